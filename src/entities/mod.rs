// Entity Models
// Following the "identity persists, values change" rule:
// a member id is stable, its display name and payment map evolve.

pub mod member;

pub use member::Member;
