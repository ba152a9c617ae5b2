//! Store membership notifications
//!
//! The host pool calls every registered [`MembershipListener`] after it swaps
//! in a new endpoint list. Closures taking `&MembershipEvent` are listeners
//! as-is, so most callers never implement the trait by hand.

use std::sync::Arc;

/// A change in the set of store endpoints.
#[derive(Clone, Debug)]
pub struct MembershipEvent {
    /// Endpoints the pool was rotating through before the change
    pub previous: Arc<Vec<String>>,
    /// Endpoints in use from now on, in rotation order
    pub current: Arc<Vec<String>>,
}

impl MembershipEvent {
    /// Endpoints present now that were not before
    pub fn added(&self) -> Vec<&str> {
        diff(&self.current, &self.previous)
    }

    /// Endpoints that were dropped from the pool
    pub fn removed(&self) -> Vec<&str> {
        diff(&self.previous, &self.current)
    }
}

fn diff<'a>(from: &'a [String], without: &[String]) -> Vec<&'a str> {
    from.iter()
        .filter(|host| !without.contains(host))
        .map(String::as_str)
        .collect()
}

/// Receives host pool membership changes.
///
/// Called synchronously from the refresh task; keep it short.
pub trait MembershipListener: Send + Sync + 'static {
    fn on_change(&self, event: &MembershipEvent);
}

impl<F> MembershipListener for F
where
    F: Fn(&MembershipEvent) + Send + Sync + 'static,
{
    fn on_change(&self, event: &MembershipEvent) {
        self(event)
    }
}
