use std::fmt;
use std::panic::{self, AssertUnwindSafe};

/// Identifier native to the page being viewed (an AniList id).
pub type PrimaryId = u64;
/// Identifier understood by the catalog (a MAL id).
pub type SecondaryId = u64;

pub const DEFAULT_BOT_URL: &str = "https://t.me/AkaAnimebot";

/// Final outcome handed to a waiter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CheckStatus {
    Exists,
    Missing,
    UnknownMapping,
    TransportError,
}

impl CheckStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Exists => "exists",
            CheckStatus::Missing => "missing",
            CheckStatus::UnknownMapping => "unknown_mapping",
            CheckStatus::TransportError => "transport_error",
        }
    }

    pub fn from_exists(exists: bool) -> Self {
        if exists {
            CheckStatus::Exists
        } else {
            CheckStatus::Missing
        }
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// What a waiter receives.
#[derive(Clone, Debug, PartialEq)]
pub struct Resolution {
    pub primary_id: Option<PrimaryId>,
    pub secondary_id: Option<SecondaryId>,
    pub display_title: String,
    pub status: CheckStatus,
}

impl Resolution {
    /// Deep link into the catalog bot. Falls back to the bare bot link when no
    /// secondary id is known.
    pub fn bot_url(&self, base: &str) -> String {
        match self.secondary_id {
            Some(id) => format!("{base}?start=dl_{id}"),
            None => base.to_string(),
        }
    }
}

/// Consumer callback. Invoked once with the final resolution.
pub type Waiter = Box<dyn FnOnce(Resolution) + Send + 'static>;

/// A pending request for the status of one page element.
pub struct LookupItem {
    pub primary_id: Option<PrimaryId>,
    pub secondary_id: Option<SecondaryId>,
    pub display_title: String,
    waiter: Waiter,
}

impl LookupItem {
    pub fn new<T, F>(primary_id: PrimaryId, display_title: T, waiter: F) -> Self
    where
        T: Into<String>,
        F: FnOnce(Resolution) + Send + 'static,
    {
        LookupItem {
            primary_id: Some(primary_id),
            secondary_id: None,
            display_title: display_title.into(),
            waiter: Box::new(waiter),
        }
    }

    /// Item for a page that already carries the secondary id.
    pub fn with_secondary<T, F>(secondary_id: SecondaryId, display_title: T, waiter: F) -> Self
    where
        T: Into<String>,
        F: FnOnce(Resolution) + Send + 'static,
    {
        LookupItem {
            primary_id: None,
            secondary_id: Some(secondary_id),
            display_title: display_title.into(),
            waiter: Box::new(waiter),
        }
    }

    /// Consumes the item and invokes its waiter.
    pub fn deliver(self, status: CheckStatus) {
        crate::counter!(crate::metrics_defs::DELIVERED, "status" => status.as_str()).increment(1);

        let LookupItem {
            primary_id,
            secondary_id,
            display_title,
            waiter,
        } = self;

        let resolution = Resolution {
            primary_id,
            secondary_id,
            display_title,
            status,
        };
        // A panicking consumer must not take the batch's other waiters with it.
        if panic::catch_unwind(AssertUnwindSafe(move || waiter(resolution))).is_err() {
            tracing::error!(?primary_id, ?secondary_id, %status, "result callback panicked");
        }
    }
}

impl fmt::Debug for LookupItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LookupItem")
            .field("primary_id", &self.primary_id)
            .field("secondary_id", &self.secondary_id)
            .field("display_title", &self.display_title)
            .finish_non_exhaustive()
    }
}
