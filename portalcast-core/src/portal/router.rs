//! Signal routing for portal request/response pairs
//!
//! Every portal request answers through a `Response` signal on a per-request
//! object path, and an established session can announce `Closed` at any time.
//! The router keeps one subscription per expected signal and hands each
//! incoming signal to at most one of them.

use std::collections::BTreeMap;
use tracing::{debug, trace};

use crate::error::{CaptureError, Result};

/// One entry of the `streams` array in a `Start` response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    /// PipeWire node id
    pub node_id: u32,
    /// `source_type` bits, if present
    pub source_type: Option<u32>,
    /// Stream size, if present
    pub size: Option<(i32, i32)>,
}

/// Decoded `results` dictionary of a `Response`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Results {
    /// `session_handle` from `CreateSession`
    pub session_handle: Option<String>,
    /// `streams` from `Start`
    pub streams: Option<Vec<StreamEntry>>,
    /// `restore_token` from `Start`
    pub restore_token: Option<String>,
}

/// Body of a `Response` signal
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    /// 0 = success, 1 = cancelled by the user, 2 = other failure
    pub status: u32,
    /// Result dictionary
    pub results: Results,
}

impl Response {
    /// Successful response with the given results
    pub fn success(results: Results) -> Self {
        Self { status: 0, results }
    }

    /// Failed response with the given status
    pub fn failure(status: u32) -> Self {
        Self {
            status,
            results: Results::default(),
        }
    }

    /// Whether the portal reported success
    pub fn is_success(&self) -> bool {
        self.status == 0
    }
}

/// Which signal a subscription waits for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    /// `org.freedesktop.portal.Request.Response`
    Response,
    /// `org.freedesktop.portal.Session.Closed`
    Closed,
}

/// A signal received from the portal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// A request finished
    Response { path: String, response: Response },
    /// A session was closed by the portal
    Closed { path: String },
}

impl Signal {
    /// Kind of this signal
    pub fn kind(&self) -> SignalKind {
        match self {
            Self::Response { .. } => SignalKind::Response,
            Self::Closed { .. } => SignalKind::Closed,
        }
    }

    /// Object path the signal was emitted on
    pub fn path(&self) -> &str {
        match self {
            Self::Response { path, .. } | Self::Closed { path } => path,
        }
    }
}

/// Identifies one subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

/// Extra filter applied after kind and path match
pub type Predicate = Box<dyn Fn(&Signal) -> bool + Send>;

struct Subscription {
    kind: SignalKind,
    path: String,
    predicate: Option<Predicate>,
    delivered: bool,
}

impl Subscription {
    fn matches(&self, signal: &Signal) -> bool {
        !self.delivered
            && self.kind == signal.kind()
            && self.path == signal.path()
            && self.predicate.as_ref().is_none_or(|predicate| predicate(signal))
    }
}

/// Dispatches portal signals to subscriptions
#[derive(Default)]
pub struct SignalRouter {
    next_id: u64,
    subscriptions: BTreeMap<SubscriptionId, Subscription>,
    lost: bool,
    unsubscribed: usize,
}

impl SignalRouter {
    /// Empty router
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for one `kind` signal on `path`
    ///
    /// Fails with [`CaptureError::TransportLost`] once the bus is gone.
    pub fn subscribe(
        &mut self,
        kind: SignalKind,
        path: impl Into<String>,
        predicate: Option<Predicate>,
    ) -> Result<SubscriptionId> {
        if self.lost {
            return Err(CaptureError::TransportLost);
        }
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        let path = path.into();
        trace!("Subscribed {:?} to {:?} on {}", id, kind, path);
        self.subscriptions.insert(
            id,
            Subscription {
                kind,
                path,
                predicate,
                delivered: false,
            },
        );
        Ok(id)
    }

    /// Drop a subscription; returns false if it was already gone
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let removed = self.subscriptions.remove(&id).is_some();
        if removed {
            self.unsubscribed += 1;
            trace!("Unsubscribed {:?}", id);
        }
        removed
    }

    /// Find the subscription for a signal
    ///
    /// The oldest matching subscription wins and is spent: it never receives
    /// another signal, but stays registered until unsubscribed.
    pub fn route(&mut self, signal: Signal) -> Option<(SubscriptionId, Signal)> {
        let id = self
            .subscriptions
            .iter()
            .find(|(_, subscription)| subscription.matches(&signal))
            .map(|(id, _)| *id);

        match id {
            Some(id) => {
                if let Some(subscription) = self.subscriptions.get_mut(&id) {
                    subscription.delivered = true;
                }
                Some((id, signal))
            }
            None => {
                debug!("Dropping unrouted {:?} signal on {}", signal.kind(), signal.path());
                None
            }
        }
    }

    /// Fail every pending subscription after the bus connection is lost
    ///
    /// Returns the subscriptions that were still waiting.
    pub fn fail_all(&mut self) -> Vec<SubscriptionId> {
        self.lost = true;
        let pending = self
            .subscriptions
            .iter()
            .filter(|(_, subscription)| !subscription.delivered)
            .map(|(id, _)| *id)
            .collect();
        self.subscriptions.clear();
        pending
    }

    /// Whether a subscription is still registered
    pub fn is_active(&self, id: SubscriptionId) -> bool {
        self.subscriptions.contains_key(&id)
    }

    /// Number of registered subscriptions
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// How many subscriptions were actually removed by `unsubscribe`
    pub fn unsubscribe_count(&self) -> usize {
        self.unsubscribed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(path: &str) -> Signal {
        Signal::Response {
            path: path.to_string(),
            response: Response::failure(2),
        }
    }

    #[test]
    fn test_delivers_once() {
        let mut router = SignalRouter::new();
        let id = router.subscribe(SignalKind::Response, "/a", None).unwrap();
        assert_eq!(router.route(response("/a")).map(|(i, _)| i), Some(id));
        assert!(router.route(response("/a")).is_none());
        assert!(router.is_active(id));
    }

    #[test]
    fn test_no_delivery_after_unsubscribe() {
        let mut router = SignalRouter::new();
        let id = router.subscribe(SignalKind::Response, "/a", None).unwrap();
        assert!(router.unsubscribe(id));
        assert!(router.route(response("/a")).is_none());
        assert!(!router.unsubscribe(id));
        assert_eq!(router.unsubscribe_count(), 1);
    }

    #[test]
    fn test_kind_and_path_must_match() {
        let mut router = SignalRouter::new();
        router.subscribe(SignalKind::Closed, "/a", None).unwrap();
        assert!(router.route(response("/a")).is_none());
        assert!(router
            .route(Signal::Closed {
                path: "/b".to_string()
            })
            .is_none());
    }

    #[test]
    fn test_first_match_wins() {
        let mut router = SignalRouter::new();
        let first = router.subscribe(SignalKind::Response, "/a", None).unwrap();
        let second = router.subscribe(SignalKind::Response, "/a", None).unwrap();
        assert_eq!(router.route(response("/a")).map(|(i, _)| i), Some(first));
        assert_eq!(router.route(response("/a")).map(|(i, _)| i), Some(second));
    }

    #[test]
    fn test_predicate_filters() {
        let mut router = SignalRouter::new();
        let predicate: Predicate = Box::new(|signal| match signal {
            Signal::Response { response, .. } => response.is_success(),
            Signal::Closed { .. } => false,
        });
        router
            .subscribe(SignalKind::Response, "/a", Some(predicate))
            .unwrap();
        assert!(router.route(response("/a")).is_none());
        let ok = Signal::Response {
            path: "/a".to_string(),
            response: Response::success(Results::default()),
        };
        assert!(router.route(ok).is_some());
    }

    #[test]
    fn test_fail_all_reports_pending() {
        let mut router = SignalRouter::new();
        let id = router.subscribe(SignalKind::Response, "/a", None).unwrap();
        assert_eq!(router.fail_all(), vec![id]);
        assert!(router.is_empty());
        assert!(matches!(
            router.subscribe(SignalKind::Response, "/b", None),
            Err(CaptureError::TransportLost)
        ));
    }
}
