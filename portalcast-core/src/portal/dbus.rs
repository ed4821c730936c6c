//! zbus driver for the ScreenCast portal

use std::collections::HashMap;
use std::os::fd::OwnedFd;

use futures::StreamExt;
use tracing::{debug, trace, warn};
use zbus::message::Type as MessageType;
use zbus::zvariant::{ObjectPath, OwnedValue, Value};
use zbus::{Connection, MatchRule, Message, MessageStream, Proxy};

use super::controller::{PortalBus, PortalEvent, SessionHandle};
use super::request::{
    OptionValue, RequestOptions, DESKTOP_BUS_NAME, DESKTOP_OBJECT_PATH, REQUEST_INTERFACE,
    SCREENCAST_INTERFACE, SESSION_INTERFACE,
};
use super::router::{Response, Results, Signal, StreamEntry};
use crate::error::{CaptureError, Result};

/// Signals queued before the stream starts dropping them
const SIGNAL_QUEUE_DEPTH: usize = 64;

/// Portal status used when a response body cannot be decoded
const STATUS_OTHER: u32 = 2;

/// ScreenCast portal on the session bus
pub struct DbusPortal {
    connection: Connection,
    proxy: Proxy<'static>,
    unique_name: String,
    cursor_modes: Option<u32>,
    version: Option<u32>,
}

impl DbusPortal {
    /// Connect to the session bus and bind the ScreenCast interface
    pub async fn connect() -> Result<Self> {
        let connection = Connection::session()
            .await
            .map_err(|e| CaptureError::bus(format!("Failed to connect to the session bus: {}", e)))?;
        Self::with_connection(connection).await
    }

    /// Bind the ScreenCast interface on an existing connection
    pub async fn with_connection(connection: Connection) -> Result<Self> {
        let proxy = Proxy::new(
            &connection,
            DESKTOP_BUS_NAME,
            DESKTOP_OBJECT_PATH,
            SCREENCAST_INTERFACE,
        )
        .await?;

        let unique_name = connection
            .unique_name()
            .map(|name| name.to_string())
            .ok_or_else(|| CaptureError::bus("Bus connection has no unique name"))?;

        let cursor_modes = proxy.get_property::<u32>("AvailableCursorModes").await.ok();
        let version = proxy.get_property::<u32>("version").await.ok();
        debug!(
            "ScreenCast portal version {:?}, cursor modes {:?}",
            version, cursor_modes
        );

        Ok(Self {
            connection,
            proxy,
            unique_name,
            cursor_modes,
            version,
        })
    }

    /// Start listening for portal signals
    ///
    /// Call before the first request so no response can slip past.
    pub async fn signals(&self) -> Result<PortalSignals> {
        let rule = MatchRule::builder()
            .msg_type(MessageType::Signal)
            .path_namespace(DESKTOP_OBJECT_PATH)?
            .build();
        let stream =
            MessageStream::for_match_rule(rule, &self.connection, Some(SIGNAL_QUEUE_DEPTH)).await?;
        Ok(PortalSignals {
            stream,
            lost: false,
        })
    }
}

impl PortalBus for DbusPortal {
    fn unique_name(&self) -> String {
        self.unique_name.clone()
    }

    fn available_cursor_modes(&self) -> Option<u32> {
        self.cursor_modes
    }

    fn version(&self) -> Option<u32> {
        self.version
    }

    async fn create_session(&mut self, options: &RequestOptions) -> Result<()> {
        trace!("CreateSession({:?})", options);
        self.proxy
            .call_method("CreateSession", &(to_vardict(options),))
            .await?;
        Ok(())
    }

    async fn select_sources(
        &mut self,
        session: &SessionHandle,
        options: &RequestOptions,
    ) -> Result<()> {
        trace!("SelectSources({}, {:?})", session, options);
        let path = ObjectPath::try_from(session.as_str())?;
        self.proxy
            .call_method("SelectSources", &(path, to_vardict(options)))
            .await?;
        Ok(())
    }

    async fn start(
        &mut self,
        session: &SessionHandle,
        parent_window: &str,
        options: &RequestOptions,
    ) -> Result<()> {
        trace!("Start({}, {:?}, {:?})", session, parent_window, options);
        let path = ObjectPath::try_from(session.as_str())?;
        self.proxy
            .call_method("Start", &(path, parent_window, to_vardict(options)))
            .await?;
        Ok(())
    }

    async fn open_pipewire_remote(&mut self, session: &SessionHandle) -> Result<OwnedFd> {
        let path = ObjectPath::try_from(session.as_str())?;
        let reply = self
            .proxy
            .call_method("OpenPipeWireRemote", &(path, HashMap::<&str, Value<'_>>::new()))
            .await?;
        let fd: zbus::zvariant::OwnedFd = reply
            .body()
            .deserialize()
            .map_err(|e| CaptureError::transport(format!("No PipeWire fd in reply: {}", e)))?;
        Ok(fd.into())
    }

    async fn close_session(&mut self, session: &SessionHandle) -> Result<()> {
        self.connection
            .call_method(
                Some(DESKTOP_BUS_NAME),
                session.as_str(),
                Some(SESSION_INTERFACE),
                "Close",
                &(),
            )
            .await?;
        Ok(())
    }
}

/// Portal signals as controller events
pub struct PortalSignals {
    stream: MessageStream,
    lost: bool,
}

impl PortalSignals {
    /// Wait for the next portal signal
    ///
    /// Yields [`PortalEvent::BusLost`] once the connection ends, and keeps
    /// yielding it on every later call.
    pub async fn next_event(&mut self) -> PortalEvent {
        if self.lost {
            return PortalEvent::BusLost;
        }
        loop {
            match self.stream.next().await {
                Some(Ok(message)) => {
                    if let Some(signal) = decode_signal(&message) {
                        return PortalEvent::Signal(signal);
                    }
                }
                Some(Err(e)) => {
                    warn!("Session bus error: {}", e);
                    self.lost = true;
                    return PortalEvent::BusLost;
                }
                None => {
                    warn!("Session bus connection closed");
                    self.lost = true;
                    return PortalEvent::BusLost;
                }
            }
        }
    }

    /// Whether the bus has gone away
    pub fn is_lost(&self) -> bool {
        self.lost
    }
}

fn to_vardict(options: &RequestOptions) -> HashMap<&'static str, Value<'_>> {
    options
        .iter()
        .map(|(key, value)| {
            let value = match value {
                OptionValue::Str(s) => Value::from(s.as_str()),
                OptionValue::U32(n) => Value::from(*n),
                OptionValue::Bool(b) => Value::from(*b),
            };
            (key, value)
        })
        .collect()
}

/// Decode a `Request.Response` or `Session.Closed` signal; other signals yield `None`
pub fn decode_signal(message: &Message) -> Option<Signal> {
    let header = message.header();
    let path = header.path()?.to_string();
    let interface = header.interface()?;
    let member = header.member()?;

    match (interface.as_str(), member.as_str()) {
        (REQUEST_INTERFACE, "Response") => {
            let response = match message
                .body()
                .deserialize::<(u32, HashMap<String, OwnedValue>)>()
            {
                Ok((status, results)) => Response {
                    status,
                    results: decode_results(&results),
                },
                Err(e) => {
                    // Still answer the waiting request so it fails instead of hanging.
                    warn!("Malformed portal response on {}: {}", path, e);
                    Response::failure(STATUS_OTHER)
                }
            };
            Some(Signal::Response { path, response })
        }
        (SESSION_INTERFACE, "Closed") => Some(Signal::Closed { path }),
        _ => None,
    }
}

/// Pick the fields the controller cares about out of a response dictionary
pub fn decode_results(results: &HashMap<String, OwnedValue>) -> Results {
    Results {
        session_handle: results.get("session_handle").and_then(|v| as_string(v)),
        streams: results.get("streams").and_then(|v| decode_streams(v)),
        restore_token: results.get("restore_token").and_then(|v| as_string(v)),
    }
}

fn as_string(value: &Value<'_>) -> Option<String> {
    match value {
        Value::Str(s) => Some(s.to_string()),
        Value::ObjectPath(path) => Some(path.to_string()),
        Value::Value(inner) => as_string(inner),
        _ => None,
    }
}

fn as_u32(value: &Value<'_>) -> Option<u32> {
    match value {
        Value::U32(n) => Some(*n),
        Value::Value(inner) => as_u32(inner),
        _ => None,
    }
}

/// `a(ua{sv})`
fn decode_streams(value: &Value<'_>) -> Option<Vec<StreamEntry>> {
    match value {
        Value::Array(array) => Some(array.iter().filter_map(decode_stream).collect()),
        Value::Value(inner) => decode_streams(inner),
        _ => None,
    }
}

fn decode_stream(value: &Value<'_>) -> Option<StreamEntry> {
    let structure = match value {
        Value::Structure(structure) => structure,
        Value::Value(inner) => return decode_stream(inner),
        _ => return None,
    };
    let [node_id, properties] = structure.fields() else {
        return None;
    };

    let mut entry = StreamEntry {
        node_id: as_u32(node_id)?,
        source_type: None,
        size: None,
    };

    if let Some(dict) = as_dict(properties) {
        for (key, value) in dict.iter() {
            let Some(key) = as_string(key) else { continue };
            match key.as_str() {
                "source_type" => entry.source_type = as_u32(value),
                "size" => entry.size = as_size(value),
                _ => {}
            }
        }
    }
    Some(entry)
}

fn as_dict<'a>(value: &'a Value<'a>) -> Option<&'a zbus::zvariant::Dict<'a, 'a>> {
    match value {
        Value::Dict(dict) => Some(dict),
        Value::Value(inner) => as_dict(inner),
        _ => None,
    }
}

/// `(ii)`
fn as_size(value: &Value<'_>) -> Option<(i32, i32)> {
    match value {
        Value::Structure(structure) => match structure.fields() {
            [Value::I32(width), Value::I32(height)] => Some((*width, *height)),
            _ => None,
        },
        Value::Value(inner) => as_size(inner),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned(value: Value<'_>) -> OwnedValue {
        value.try_to_owned().unwrap()
    }

    fn stream_entry(node_id: u32, source_type: u32) -> (u32, HashMap<String, Value<'static>>) {
        let mut props = HashMap::new();
        props.insert("source_type".to_string(), Value::from(source_type));
        props.insert("size".to_string(), Value::from((1920i32, 1080i32)));
        (node_id, props)
    }

    #[test]
    fn test_decode_session_handle() {
        let mut results = HashMap::new();
        results.insert(
            "session_handle".to_string(),
            owned(Value::from("/org/freedesktop/portal/desktop/session/1_42/t")),
        );
        let decoded = decode_results(&results);
        assert_eq!(
            decoded.session_handle.as_deref(),
            Some("/org/freedesktop/portal/desktop/session/1_42/t")
        );
        assert!(decoded.streams.is_none());
    }

    #[test]
    fn test_decode_streams() {
        let mut results = HashMap::new();
        results.insert(
            "streams".to_string(),
            owned(Value::from(vec![stream_entry(57, 1)])),
        );
        results.insert("restore_token".to_string(), owned(Value::from("abc")));

        let decoded = decode_results(&results);
        let streams = decoded.streams.unwrap();
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].node_id, 57);
        assert_eq!(streams[0].source_type, Some(1));
        assert_eq!(streams[0].size, Some((1920, 1080)));
        assert_eq!(decoded.restore_token.as_deref(), Some("abc"));
    }

    #[test]
    fn test_missing_keys_decode_to_none() {
        let decoded = decode_results(&HashMap::new());
        assert_eq!(decoded, Results::default());
    }

    #[test]
    fn test_wrong_types_are_ignored() {
        let mut results = HashMap::new();
        results.insert("session_handle".to_string(), owned(Value::from(7u32)));
        let decoded = decode_results(&results);
        assert!(decoded.session_handle.is_none());
    }

    #[test]
    fn test_vardict_carries_all_options() {
        let options = RequestOptions::new()
            .str("handle_token", "t1")
            .u32("types", 1)
            .bool("multiple", false);
        let dict = to_vardict(&options);
        assert_eq!(dict.len(), 3);
        assert_eq!(dict.get("types"), Some(&Value::from(1u32)));
        assert_eq!(dict.get("multiple"), Some(&Value::from(false)));
    }
}
