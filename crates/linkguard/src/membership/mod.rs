/// Group membership knowledge: who is an admin where.
///
/// The cache is permanent and event-invalidated; the fetcher fills it on
/// a miss. Event handling only ever edits or evicts entries.
pub mod cache;
pub mod events;
pub mod fetcher;

pub use cache::{AdminLookup, CacheEpoch, EpochGuard, MembershipCache, RoleDirection};
pub use events::{stub_codes, HistoryNotice, MembershipDelta, ParticipantAction, ParticipantsUpdate};
pub use fetcher::{Membership, MembershipSnapshot, RetryingFetcher};
