// Chat state shared by the front-end: identity, contacts, the active
// selection and the reconciled messages behind it.

use log::{debug, info, warn};
use std::fmt::Display;

use crate::models::{Contact, Identity, Message};
use crate::reconciler::{ConversationKey, Reconciler};
use crate::session::{ConnectionState, SessionEvent};

/// Token carried by a history fetch so its completion can tell whether the
/// selection moved on in the meantime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRequest {
    pub identity: Identity,
    pub contact: Identity,
    pub generation: u64,
}

impl HistoryRequest {
    pub fn conversation(&self) -> ConversationKey {
        ConversationKey::new(&self.identity, &self.contact)
    }
}

#[derive(Debug, Default)]
pub struct ChatState {
    identity: Option<Identity>,
    contacts: Vec<Contact>,
    active_contact: Option<Identity>,
    generation: u64,
    connection: Option<ConnectionState>,
    reconciler: Reconciler,
}

impl ChatState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Start over for `identity`. Everything derived from the previous
    /// identity is dropped.
    pub fn switch_identity(&mut self, identity: &str) {
        if self.identity.as_deref() == Some(identity) {
            return;
        }
        info!("Switching identity to {}", identity);
        self.identity = Some(identity.to_string());
        self.contacts.clear();
        self.active_contact = None;
        self.generation += 1;
        self.connection = None;
        self.reconciler.reset(identity);
    }

    /// Apply a contact list fetch. Failure is treated as an empty list.
    pub fn set_contacts<E: Display>(&mut self, result: Result<Vec<Contact>, E>) {
        let contacts = match result {
            Ok(contacts) => contacts,
            Err(e) => {
                warn!("Contact fetch failed, showing none: {}", e);
                Vec::new()
            }
        };
        let me = self.identity.clone();
        self.contacts = contacts
            .into_iter()
            .filter(|c| Some(&c.username) != me.as_ref())
            .collect();
    }

    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    pub fn add_contact(&mut self, username: &str) {
        if self.identity.as_deref() == Some(username) {
            return;
        }
        if !self.contacts.iter().any(|c| c.username == username) {
            self.contacts.push(Contact {
                username: username.to_string(),
            });
        }
    }

    pub fn active_contact(&self) -> Option<&str> {
        self.active_contact.as_deref()
    }

    /// Make `contact` the displayed conversation and describe the history
    /// fetch that should follow. `None` without an identity.
    pub fn select_contact(&mut self, contact: &str) -> Option<HistoryRequest> {
        let identity = self.identity.clone()?;
        self.generation += 1;
        self.active_contact = Some(contact.to_string());
        debug!("Selected {} (generation {})", contact, self.generation);
        Some(HistoryRequest {
            identity,
            contact: contact.to_string(),
            generation: self.generation,
        })
    }

    /// True while `request` still describes the displayed conversation.
    pub fn is_current(&self, request: &HistoryRequest) -> bool {
        self.generation == request.generation
            && self.identity.as_deref() == Some(request.identity.as_str())
    }

    /// Merge a finished history fetch.
    ///
    /// Results for the current identity are always merged, even when the
    /// user has since picked another contact; the selection is never
    /// touched. A failed fetch merges nothing. Returns whether the request is
    /// still current.
    pub fn apply_history<E: Display>(
        &mut self,
        request: &HistoryRequest,
        result: Result<Vec<Message>, E>,
    ) -> bool {
        if self.identity.as_deref() != Some(request.identity.as_str()) {
            debug!(
                "Discarding history for {} fetched under previous identity {}",
                request.contact, request.identity
            );
            return false;
        }

        match result {
            Ok(messages) => self.reconciler.ingest_history(&request.conversation(), messages),
            Err(e) => warn!("History fetch for {} failed: {}", request.contact, e),
        }

        self.is_current(request)
    }

    /// Feed one live event in.
    pub fn apply_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Message(message) => {
                let Some(me) = self.identity.clone() else {
                    return;
                };
                if message.from != me && message.to != me {
                    debug!("Ignoring message {} not addressed to {}", message.id, me);
                    return;
                }
                let peer = message.peer_of(&me).to_string();
                self.add_contact(&peer);
                self.reconciler.ingest_event(message);
            }
            SessionEvent::State { identity, state } => {
                if self.identity.as_deref() == Some(identity.as_str()) {
                    self.connection = Some(state);
                }
            }
        }
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection.unwrap_or(ConnectionState::Disconnected)
    }

    /// The displayed conversation, derived on demand.
    pub fn view(&self) -> Vec<Message> {
        match (&self.identity, &self.active_contact) {
            (Some(me), Some(contact)) => self.reconciler.conversation_view(me, contact),
            _ => Vec::new(),
        }
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }
}
