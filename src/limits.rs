// Hard caps on user-supplied input. Anything past these is rejected before it
// reaches a ledger lock.

pub const MAX_NAME_LEN: usize = 200;
pub const MAX_EMAIL_LEN: usize = 254;
pub const MAX_PAYMENT_REFERENCE_LEN: usize = 100;
pub const MAX_SPECIAL_REQUESTS_LEN: usize = 2_000;
pub const MAX_REASON_LEN: usize = 500;
pub const MAX_MAINTENANCE_MESSAGE_LEN: usize = 1_000;
pub const MAX_PACKAGE_CODE_LEN: usize = 20;

/// Packages allow at most this many participants, whatever the admin asks for.
pub const MAX_PACKAGE_PARTICIPANTS: u32 = 10;
pub const MAX_PACKAGES: usize = 256;

/// Active + historical bookings kept on a single date.
pub const MAX_BOOKINGS_PER_DAY: usize = 10_000;

pub const MAX_WHEELS: u32 = 1_000;
pub const MAX_DAILY_SESSIONS: u32 = 1_440;
pub const MAX_BOOKING_HORIZON_DAYS: u32 = 3_660;
pub const MAX_RESCHEDULE_CUTOFF_HOURS: u32 = 720;

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;
