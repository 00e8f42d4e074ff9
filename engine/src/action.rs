//! Action types for expressing queued user mutations.
//!
//! Every queued item carries exactly one [`QueueAction`]. The action kind is a
//! closed set and each variant owns a payload type that knows its own
//! identifying field, so dedup never has to guess which key names the target.

use crate::{error::Result, Error};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// The kind of a queued action, as persisted in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    AddFavorite,
    RemoveFavorite,
    AddReflection,
    UpdateReflection,
    DeleteReflection,
}

impl ActionKind {
    /// Every kind, in declaration order.
    pub const ALL: [ActionKind; 5] = [
        ActionKind::AddFavorite,
        ActionKind::RemoveFavorite,
        ActionKind::AddReflection,
        ActionKind::UpdateReflection,
        ActionKind::DeleteReflection,
    ];

    /// Wire name of the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::AddFavorite => "add_favorite",
            ActionKind::RemoveFavorite => "remove_favorite",
            ActionKind::AddReflection => "add_reflection",
            ActionKind::UpdateReflection => "update_reflection",
            ActionKind::DeleteReflection => "delete_reflection",
        }
    }

    /// The kind that undoes this one, if any.
    ///
    /// Only favorites pair up: a queued add followed by a remove of the same
    /// verse leaves nothing to replay.
    pub fn opposite(self) -> Option<ActionKind> {
        match self {
            ActionKind::AddFavorite => Some(ActionKind::RemoveFavorite),
            ActionKind::RemoveFavorite => Some(ActionKind::AddFavorite),
            _ => None,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ActionKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::UnknownAction(s.to_string()))
    }
}

/// The logical record an action applies to.
///
/// Verse and reflection identifiers are separate namespaces: favoriting
/// verse `"42"` never collides with editing reflection `"42"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    Verse(String),
    Reflection(String),
}

impl Target {
    /// The bare identifier.
    pub fn id(&self) -> &str {
        match self {
            Target::Verse(id) | Target::Reflection(id) => id,
        }
    }
}

/// Payload of `add_favorite` / `remove_favorite`.
///
/// The host's object is kept as sent; only the verse identifier is read
/// from it.
#[derive(Debug, Clone, PartialEq)]
pub struct FavoritePayload {
    verse_id: String,
    fields: Map<String, Value>,
}

impl FavoritePayload {
    pub fn new(verse_id: impl Into<String>) -> Self {
        let verse_id = verse_id.into();
        let mut fields = Map::new();
        fields.insert("verse_id".into(), Value::String(verse_id.clone()));
        Self { verse_id, fields }
    }

    /// Verse identifier, e.g. `"John-3-16"`.
    pub fn verse_id(&self) -> &str {
        &self.verse_id
    }

    /// The payload object as queued.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Attach an opaque field. Setting an identifying key re-reads the
    /// verse identifier when the new value names one.
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        if let Some(verse_id) = Self::identify(&self.fields) {
            self.verse_id = verse_id;
        }
        self
    }

    /// `verse_id` is authoritative; older clients only sent `id`.
    fn identify(fields: &Map<String, Value>) -> Option<String> {
        fields
            .get("verse_id")
            .and_then(structured_identifier)
            .or_else(|| fields.get("id").and_then(identifier))
    }

    fn from_value(kind: ActionKind, value: Value) -> Result<Self> {
        let mut fields = into_object(kind, value)?;
        let verse_id = Self::identify(&fields).ok_or_else(|| invalid(kind, "missing verse_id"))?;

        if !fields.contains_key("verse_id") {
            if let Some(id) = fields.get("id").cloned() {
                fields.insert("verse_id".into(), id);
            }
        }

        Ok(Self { verse_id, fields })
    }

    fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }
}

/// Payload of the reflection actions.
///
/// The host's object is kept as sent; only `id` is read from it.
#[derive(Debug, Clone, PartialEq)]
pub struct ReflectionPayload {
    id: String,
    fields: Map<String, Value>,
}

impl ReflectionPayload {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let mut fields = Map::new();
        fields.insert("id".into(), Value::String(id.clone()));
        Self { id, fields }
    }

    pub fn with_content(self, content: impl Into<String>) -> Self {
        self.with_field("content", Value::String(content.into()))
    }

    /// Attach an opaque field. Setting `id` re-reads the identifier when
    /// the new value names one.
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        if let Some(id) = self.fields.get("id").and_then(identifier) {
            self.id = id;
        }
        self
    }

    /// Reflection identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The `content` field as queued. `Some(Value::Null)` is an explicit
    /// clear and differs from an absent field.
    pub fn content(&self) -> Option<&Value> {
        self.fields.get("content")
    }

    /// The payload object as queued.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    fn from_value(kind: ActionKind, value: Value) -> Result<Self> {
        let fields = into_object(kind, value)?;
        let id = fields
            .get("id")
            .and_then(identifier)
            .ok_or_else(|| invalid(kind, "missing id"))?;
        Ok(Self { id, fields })
    }

    fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }
}

/// A user mutation waiting to be replayed against the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueAction {
    AddFavorite(FavoritePayload),
    RemoveFavorite(FavoritePayload),
    AddReflection(ReflectionPayload),
    UpdateReflection(ReflectionPayload),
    DeleteReflection(ReflectionPayload),
}

impl QueueAction {
    /// Favorite a verse.
    pub fn add_favorite(verse_id: impl Into<String>) -> Self {
        QueueAction::AddFavorite(FavoritePayload::new(verse_id))
    }

    /// Unfavorite a verse.
    pub fn remove_favorite(verse_id: impl Into<String>) -> Self {
        QueueAction::RemoveFavorite(FavoritePayload::new(verse_id))
    }

    /// Create a reflection.
    pub fn add_reflection(id: impl Into<String>, content: impl Into<String>) -> Self {
        QueueAction::AddReflection(ReflectionPayload::new(id).with_content(content))
    }

    /// Edit a reflection.
    pub fn update_reflection(id: impl Into<String>, content: impl Into<String>) -> Self {
        QueueAction::UpdateReflection(ReflectionPayload::new(id).with_content(content))
    }

    /// Delete a reflection.
    pub fn delete_reflection(id: impl Into<String>) -> Self {
        QueueAction::DeleteReflection(ReflectionPayload::new(id))
    }

    /// Decode an untyped payload for the given kind.
    pub fn from_parts(kind: ActionKind, payload: Value) -> Result<Self> {
        Ok(match kind {
            ActionKind::AddFavorite => {
                QueueAction::AddFavorite(FavoritePayload::from_value(kind, payload)?)
            }
            ActionKind::RemoveFavorite => {
                QueueAction::RemoveFavorite(FavoritePayload::from_value(kind, payload)?)
            }
            ActionKind::AddReflection => {
                QueueAction::AddReflection(ReflectionPayload::from_value(kind, payload)?)
            }
            ActionKind::UpdateReflection => {
                QueueAction::UpdateReflection(ReflectionPayload::from_value(kind, payload)?)
            }
            ActionKind::DeleteReflection => {
                QueueAction::DeleteReflection(ReflectionPayload::from_value(kind, payload)?)
            }
        })
    }

    /// Get the action kind.
    pub fn kind(&self) -> ActionKind {
        match self {
            QueueAction::AddFavorite(_) => ActionKind::AddFavorite,
            QueueAction::RemoveFavorite(_) => ActionKind::RemoveFavorite,
            QueueAction::AddReflection(_) => ActionKind::AddReflection,
            QueueAction::UpdateReflection(_) => ActionKind::UpdateReflection,
            QueueAction::DeleteReflection(_) => ActionKind::DeleteReflection,
        }
    }

    /// Get the record this action targets.
    pub fn target(&self) -> Target {
        match self {
            QueueAction::AddFavorite(p) | QueueAction::RemoveFavorite(p) => {
                Target::Verse(p.verse_id.clone())
            }
            QueueAction::AddReflection(p)
            | QueueAction::UpdateReflection(p)
            | QueueAction::DeleteReflection(p) => Target::Reflection(p.id.clone()),
        }
    }

    /// Whether the target identifier equals `identifier`.
    pub fn targets(&self, identifier: &str) -> bool {
        self.target().id() == identifier
    }

    /// The payload as the untyped JSON object that is persisted.
    pub fn payload(&self) -> Value {
        match self {
            QueueAction::AddFavorite(p) | QueueAction::RemoveFavorite(p) => p.to_value(),
            QueueAction::AddReflection(p)
            | QueueAction::UpdateReflection(p)
            | QueueAction::DeleteReflection(p) => p.to_value(),
        }
    }
}

impl fmt::Display for QueueAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.target().id())
    }
}

fn into_object(kind: ActionKind, value: Value) -> Result<Map<String, Value>> {
    match value {
        Value::Object(fields) => Ok(fields),
        _ => Err(invalid(kind, "payload must be an object")),
    }
}

/// Read an identifier that may have been stored as a string or a number.
///
/// The result is only used to compare targets; the payload keeps the
/// original value.
fn identifier(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Like [`identifier`], but a structured reference such as
/// `{"book": "John", "chapter": 3}` identifies by its compact JSON text.
fn structured_identifier(value: &Value) -> Option<String> {
    match value {
        Value::Object(_) | Value::Array(_) => Some(value.to_string()),
        other => identifier(other),
    }
}

fn invalid(kind: ActionKind, reason: &str) -> Error {
    Error::InvalidPayload {
        kind,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_wire_names() {
        for kind in ActionKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
            assert_eq!(kind.as_str().parse::<ActionKind>().unwrap(), kind);
        }
    }

    #[test]
    fn unknown_kind() {
        let err = "share_verse".parse::<ActionKind>().unwrap_err();
        assert_eq!(err, Error::UnknownAction("share_verse".into()));
    }

    #[test]
    fn only_favorites_have_opposites() {
        assert_eq!(
            ActionKind::AddFavorite.opposite(),
            Some(ActionKind::RemoveFavorite)
        );
        assert_eq!(
            ActionKind::RemoveFavorite.opposite(),
            Some(ActionKind::AddFavorite)
        );
        assert_eq!(ActionKind::AddReflection.opposite(), None);
        assert_eq!(ActionKind::DeleteReflection.opposite(), None);
    }

    #[test]
    fn favorite_prefers_verse_id() {
        let action = QueueAction::from_parts(
            ActionKind::AddFavorite,
            json!({"verse_id": "John-3-16", "id": "fav-9"}),
        )
        .unwrap();
        assert_eq!(action.target(), Target::Verse("John-3-16".into()));
    }

    #[test]
    fn favorite_falls_back_to_id() {
        let action =
            QueueAction::from_parts(ActionKind::RemoveFavorite, json!({"id": "Gen-1-1"})).unwrap();
        assert_eq!(action.target(), Target::Verse("Gen-1-1".into()));
        // The legacy `id` key is kept alongside the normalized one.
        assert_eq!(
            action.payload(),
            json!({"id": "Gen-1-1", "verse_id": "Gen-1-1"})
        );
    }

    #[test]
    fn numeric_identifiers() {
        let action =
            QueueAction::from_parts(ActionKind::DeleteReflection, json!({"id": 17})).unwrap();
        assert_eq!(action.target(), Target::Reflection("17".into()));
        // The wire type is left alone.
        assert_eq!(action.payload(), json!({"id": 17}));
    }

    #[test]
    fn payload_is_kept_as_queued() {
        let clear = json!({"id": 17, "content": null});
        let action =
            QueueAction::from_parts(ActionKind::UpdateReflection, clear.clone()).unwrap();
        assert_eq!(action.payload(), clear);
        match &action {
            QueueAction::UpdateReflection(p) => assert_eq!(p.content(), Some(&Value::Null)),
            other => panic!("unexpected action {other:?}"),
        }

        let nested = json!({
            "verse_id": {"book": "John", "ch": 3, "v": 16},
            "id": "fav-1",
            "meta": {"source": ["reader", null]}
        });
        let action = QueueAction::from_parts(ActionKind::AddFavorite, nested.clone()).unwrap();
        assert_eq!(action.payload(), nested);
        assert_eq!(
            action.target(),
            Target::Verse(json!({"book": "John", "ch": 3, "v": 16}).to_string())
        );
    }

    #[test]
    fn builders_attach_opaque_fields() {
        let fav = FavoritePayload::new("Ps-23-1").with_field("note", json!({"pinned": true}));
        assert_eq!(fav.verse_id(), "Ps-23-1");
        assert_eq!(fav.fields()["note"], json!({"pinned": true}));
        assert_eq!(
            QueueAction::AddFavorite(fav).payload(),
            json!({"verse_id": "Ps-23-1", "note": {"pinned": true}})
        );

        let refl = ReflectionPayload::new("r1")
            .with_content("draft")
            .with_field("content", Value::Null)
            .with_field("id", json!(99));
        assert_eq!(refl.id(), "99");
        assert_eq!(
            QueueAction::UpdateReflection(refl).payload(),
            json!({"id": 99, "content": null})
        );
    }

    #[test]
    fn missing_identifier_is_rejected() {
        let err = QueueAction::from_parts(ActionKind::AddFavorite, json!({"note": "x"}))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidPayload {
                kind: ActionKind::AddFavorite,
                ..
            }
        ));

        let err =
            QueueAction::from_parts(ActionKind::UpdateReflection, json!({"id": ""})).unwrap_err();
        assert!(matches!(err, Error::InvalidPayload { .. }));

        let err = QueueAction::from_parts(ActionKind::AddReflection, json!("r1")).unwrap_err();
        assert!(matches!(err, Error::InvalidPayload { .. }));
    }

    #[test]
    fn reflection_payload_keeps_extra_fields() {
        let payload = json!({
            "id": "r1",
            "content": "Grace upon grace",
            "verse_id": "John-1-16",
            "tags": ["grace"]
        });
        let action =
            QueueAction::from_parts(ActionKind::AddReflection, payload.clone()).unwrap();

        match &action {
            QueueAction::AddReflection(p) => {
                assert_eq!(p.id(), "r1");
                assert_eq!(p.content(), Some(&json!("Grace upon grace")));
                assert_eq!(p.fields()["tags"], json!(["grace"]));
            }
            other => panic!("unexpected action {other:?}"),
        }
        assert_eq!(action.payload(), payload);
    }

    #[test]
    fn non_text_content_stays_opaque() {
        let payload = json!({"id": "r1", "content": {"blocks": []}});
        let action =
            QueueAction::from_parts(ActionKind::UpdateReflection, payload.clone()).unwrap();
        assert_eq!(action.payload(), payload);
    }

    #[test]
    fn verse_and_reflection_namespaces_differ() {
        let fav = QueueAction::add_favorite("42");
        let refl = QueueAction::delete_reflection("42");
        assert_ne!(fav.target(), refl.target());
        assert!(fav.targets("42"));
        assert!(refl.targets("42"));
    }

    #[test]
    fn display() {
        let action = QueueAction::update_reflection("r1", "text");
        assert_eq!(action.to_string(), "update_reflection r1");
    }
}
