//! Append-only event trail (§6 Persistent layout: `events/<type>/<uuid>/<ts>`).
//! Events are never updated or deleted through the API - each call writes a
//! brand new key keyed by its own timestamp.

use sf_core::config::keys;
use sf_core::error::Result;
use sf_core::model::Event;

use crate::repo;
use crate::state::AppState;

pub async fn append_event(
    state: &AppState,
    object_type: &str,
    object_uuid: &str,
    source: &str,
    verb: &str,
    message: &str,
) -> Result<()> {
    let event = Event::new(object_type, object_uuid, source, verb, message);
    let subkey = format!("{object_type}/{object_uuid}");
    let key = event.timestamp.timestamp_nanos_opt().unwrap_or_default().to_string();
    repo::put_nested(&state.store, keys::EVENTS, &subkey, &key, &event).await
}
