//! Service context bundling the ports, the store and engine configuration.

use std::sync::Arc;

use chrono::NaiveDate;

use crate::adapters::fixed::{FixedClock, RecordingNotifier, SequentialIdGenerator};
use crate::calendar::BusinessCalendar;
use crate::config::Settings;
use crate::locks::ProgramLocks;
use crate::ports::clock::Clock;
use crate::ports::filesystem::FileSystem;
use crate::ports::id_gen::IdGenerator;
use crate::ports::notifier::Notifier;
use crate::store::{InMemoryStore, WorkGraphStore};

/// Bundles everything an engine operation needs.
///
/// Each boxed field is one external boundary. Constructors wire up live or
/// deterministic adapters.
pub struct ServiceContext {
    /// Clock for obtaining the current time.
    pub clock: Box<dyn Clock>,
    /// ID generator for records and tokens.
    pub id_gen: Box<dyn IdGenerator>,
    /// Filesystem for snapshots and holiday files.
    pub fs: Box<dyn FileSystem>,
    /// Notification delivery.
    pub notifier: Box<dyn Notifier>,
    /// Work graph storage.
    pub store: Arc<dyn WorkGraphStore>,
    /// Engine settings.
    pub settings: Settings,
    /// Holidays and business hours.
    pub calendar: BusinessCalendar,
    /// Program-scoped locks.
    pub locks: ProgramLocks,
}

impl ServiceContext {
    /// Creates a live context over `store`.
    ///
    /// Notifications go to the configured webhook, or to the log when none is
    /// configured.
    #[must_use]
    pub fn live(
        settings: Settings,
        store: Arc<dyn WorkGraphStore>,
        calendar: BusinessCalendar,
    ) -> Self {
        use crate::adapters::live::clock::LiveClock;
        use crate::adapters::live::filesystem::LiveFileSystem;
        use crate::adapters::live::id_gen::LiveIdGenerator;
        use crate::adapters::live::notifier::{LogNotifier, WebhookNotifier};

        let notifier: Box<dyn Notifier> = match settings.webhook_url.as_deref() {
            Some(url) => Box::new(WebhookNotifier::new(url)),
            None => Box::new(LogNotifier),
        };

        Self {
            clock: Box::new(LiveClock),
            id_gen: Box::new(LiveIdGenerator::new()),
            fs: Box::new(LiveFileSystem),
            notifier,
            store,
            settings,
            calendar,
            locks: ProgramLocks::new(),
        }
    }

    /// Creates a reproducible context: pinned clock, sequential ids, an empty
    /// in-memory store and a recording notifier.
    ///
    /// The clock and notifier are cheap handles; keep clones to advance time
    /// or inspect sent notifications.
    #[must_use]
    pub fn deterministic(clock: FixedClock, notifier: RecordingNotifier) -> Self {
        use crate::adapters::live::filesystem::LiveFileSystem;

        let settings = Settings::default();
        Self {
            clock: Box::new(clock),
            id_gen: Box::new(SequentialIdGenerator::new()),
            fs: Box::new(LiveFileSystem),
            notifier: Box::new(notifier),
            store: Arc::new(InMemoryStore::new()),
            calendar: BusinessCalendar::from_settings(&settings),
            settings,
            locks: ProgramLocks::new(),
        }
    }

    /// Replaces the settings.
    #[must_use]
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Replaces the calendar.
    #[must_use]
    pub fn with_calendar(mut self, calendar: BusinessCalendar) -> Self {
        self.calendar = calendar;
        self
    }

    /// Today's date in UTC.
    #[must_use]
    pub fn today(&self) -> NaiveDate {
        self.clock.now().date_naive()
    }
}
