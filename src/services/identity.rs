use tokio::sync::watch;

use crate::models::Actor;

/// Identity as reported by the external provider. `Loading` is a pending
/// state, not an error; history fetches suspend on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityState {
    Loading,
    Anonymous,
    SignedIn(Actor),
}

impl IdentityState {
    pub fn actor(&self) -> Option<&Actor> {
        match self {
            IdentityState::SignedIn(actor) => Some(actor),
            _ => None,
        }
    }
}

/// Seam over the external identity provider. The receiver returned by
/// `watch` is the subscription handle; dropping it releases the
/// subscription.
pub trait IdentityProvider: Send + Sync {
    fn state(&self) -> IdentityState;

    fn watch(&self) -> watch::Receiver<IdentityState>;
}

/// Watch-channel identity provider. The embedder drives it with `set` on
/// sign-in and sign-out events.
#[derive(Debug)]
pub struct AuthState {
    tx: watch::Sender<IdentityState>,
}

impl AuthState {
    pub fn new(initial: IdentityState) -> Self {
        Self {
            tx: watch::channel(initial).0,
        }
    }

    pub fn signed_in(actor: Actor) -> Self {
        Self::new(IdentityState::SignedIn(actor))
    }

    pub fn anonymous() -> Self {
        Self::new(IdentityState::Anonymous)
    }

    pub fn loading() -> Self {
        Self::new(IdentityState::Loading)
    }

    pub fn set(&self, state: IdentityState) {
        // send_replace rather than send: updates must land even while no
        // session is subscribed.
        self.tx.send_replace(state);
    }
}

impl IdentityProvider for AuthState {
    fn state(&self) -> IdentityState {
        self.tx.borrow().clone()
    }

    fn watch(&self) -> watch::Receiver<IdentityState> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn watch_observes_sign_in() {
        let auth = AuthState::loading();
        let mut rx = auth.watch();
        assert_eq!(*rx.borrow(), IdentityState::Loading);

        auth.set(IdentityState::SignedIn(Actor {
            id: "u1".to_string(),
            email: Some("u1@example.com".to_string()),
        }));

        let resolved = rx
            .wait_for(|state| *state != IdentityState::Loading)
            .await
            .unwrap();
        assert_eq!(resolved.actor().unwrap().id, "u1");
    }

    #[test]
    fn snapshot_reflects_sign_out() {
        let auth = AuthState::signed_in(Actor {
            id: "u1".to_string(),
            email: None,
        });
        auth.set(IdentityState::Anonymous);
        assert_eq!(auth.state(), IdentityState::Anonymous);
    }
}
