//!
//! Websocket push channel for the node API.
//!
//! A listener opens one websocket connection per address. The node greets every new connection
//! with a `{"uid": ...}` frame; subscriptions are then requested with
//! `{"uid", "subscribe": "<topic>/<address>"}` and cancelled with the matching `unsubscribe`
//! frame. Incoming `{"topic", "data"}` frames are routed to the stream of the matching topic.

use super::services::{EventStream, Listener, PushChannel};
use super::types::*;

use futures::channel::mpsc::{self, UnboundedSender};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
	connect_async,
	tungstenite::{Message, client::IntoClientRequest},
};
use tracing::{debug, error, info, warn};

type Routes = Arc<Mutex<HashMap<String, UnboundedSender<Result<PushEvent, ApiError>>>>>;

/// Push channel backed by the node websocket endpoint
#[derive(Clone)]
pub struct WebSocketPushChannel {
	/// The websocket URL of the node.
	ws_url: String,
}

impl WebSocketPushChannel {
	pub fn new(ws_url: String) -> Self {
		Self { ws_url }
	}
}

#[async_trait::async_trait]
impl PushChannel for WebSocketPushChannel {
	async fn open(&self, address: &str) -> Result<Box<dyn Listener>, ApiError> {
		debug!("Attempting WebSocket connection to: {}", self.ws_url);

		let request = self.ws_url.clone().into_client_request()?;
		let (ws_stream, response) = connect_async(request).await?;
		debug!(
			"WebSocket connection established, response status: {}",
			response.status()
		);
		let (mut ws_sender, mut ws_receiver) = ws_stream.split();

		// The node sends the connection uid before anything else
		let uid = match ws_receiver.next().await {
			Some(msg) => match msg? {
				Message::Text(text) => {
					let parsed: serde_json::Value = serde_json::from_str(&text)?;
					parsed
						.get("uid")
						.and_then(|uid| uid.as_str())
						.map(str::to_string)
						.ok_or_else(|| {
							ApiError::ChannelError("Handshake frame without uid".to_string())
						})?
				}
				_ => {
					return Err(ApiError::ChannelError(
						"Unexpected message type during handshake".to_string(),
					));
				}
			},
			None => {
				return Err(ApiError::ChannelError(
					"Connection closed during handshake".to_string(),
				));
			}
		};

		// Writes go through a single task so the listener does not need to own the sink
		let (outgoing, mut outgoing_rx) = mpsc::unbounded::<Message>();
		let writer = tokio::spawn(async move {
			while let Some(message) = outgoing_rx.next().await {
				let closing = matches!(message, Message::Close(_));
				if let Err(e) = ws_sender.send(message).await {
					error!("Failed to write to websocket: {}", e);
					break;
				}
				if closing {
					break;
				}
			}
			let _ = ws_sender.close().await;
		});

		let routes: Routes = Arc::new(Mutex::new(HashMap::new()));
		let reader_routes = routes.clone();
		let reader = tokio::spawn(async move {
			while let Some(msg) = ws_receiver.next().await {
				match msg {
					Ok(Message::Text(text)) => route_frame(&reader_routes, &text).await,
					Ok(Message::Close(_)) => {
						debug!("WebSocket closed by node");
						break;
					}
					Ok(_) => {}
					Err(e) => {
						error!("WebSocket read error: {}", e);
						let mut routes = reader_routes.lock().await;
						for sender in routes.values() {
							let _ = sender.unbounded_send(Err(ApiError::ChannelError(
								format!("websocket read error: {}", e),
							)));
						}
						routes.clear();
						break;
					}
				}
			}
			// Dropping the senders ends every topic stream
			reader_routes.lock().await.clear();
		});

		info!("Opened push channel {} for {}", uid, address);

		Ok(Box::new(WebSocketListener {
			address: address.to_string(),
			uid,
			outgoing,
			routes,
			reader,
			writer,
			open: true,
		}))
	}
}

/// Decode one `{"topic", "data"}` frame and forward it to the subscribed topic stream.
async fn route_frame(routes: &Routes, text: &str) {
	let parsed: serde_json::Value = match serde_json::from_str(text) {
		Ok(parsed) => parsed,
		Err(e) => {
			error!("Failed to parse websocket frame: {}", e);
			return;
		}
	};

	let Some(channel) = parsed.get("topic").and_then(|t| t.as_str()) else {
		debug!("Ignoring frame without topic");
		return;
	};
	let Some(topic) = channel
		.split('/')
		.next()
		.and_then(Topic::from_channel_name)
	else {
		debug!("Ignoring frame for unknown topic: {}", channel);
		return;
	};

	let data = parsed
		.get("data")
		.cloned()
		.unwrap_or(serde_json::Value::Null);
	let event = decode_event(topic, data);

	let routes = routes.lock().await;
	match routes.get(channel) {
		Some(sender) => {
			if sender.unbounded_send(event).is_err() {
				debug!("Subscriber for {} went away", channel);
			}
		}
		None => debug!("No subscriber for {}", channel),
	}
}

fn decode_event(topic: Topic, data: serde_json::Value) -> Result<PushEvent, ApiError> {
	match (topic, topic.group()) {
		(Topic::Status, _) => {
			let status: StatusDto = serde_json::from_value(data)?;
			Ok(PushEvent::Status {
				hash: status.hash,
				code: status.code,
			})
		}
		(Topic::UnconfirmedRemoved | Topic::PartialRemoved, Some(group)) => {
			let removed: RemovedDto = serde_json::from_value(data)?;
			Ok(PushEvent::Removed {
				group,
				hash: removed.meta.hash,
			})
		}
		(_, Some(group)) => {
			let record: TransactionDto = serde_json::from_value(data)?;
			Ok(PushEvent::Added(record.into_transaction(group)?))
		}
		(_, None) => Err(ApiError::InvalidPayload(format!(
			"topic {} carries no group",
			topic
		))),
	}
}

/// A websocket connection bound to one address
struct WebSocketListener {
	address: String,
	uid: String,
	outgoing: UnboundedSender<Message>,
	routes: Routes,
	reader: JoinHandle<()>,
	writer: JoinHandle<()>,
	open: bool,
}

impl WebSocketListener {
	fn send_json(&self, value: serde_json::Value) -> Result<(), ApiError> {
		self.outgoing
			.unbounded_send(Message::Text(value.to_string()))
			.map_err(|_| ApiError::ChannelError("websocket writer has stopped".to_string()))
	}
}

#[async_trait::async_trait]
impl Listener for WebSocketListener {
	fn address(&self) -> &str {
		&self.address
	}

	fn is_open(&self) -> bool {
		self.open && !self.reader.is_finished()
	}

	async fn subscribe(&mut self, topic: Topic) -> Result<EventStream, ApiError> {
		if !self.open {
			return Err(ApiError::ChannelError("listener is closed".to_string()));
		}

		let channel = topic.channel_for(&self.address);
		let (sender, receiver) = mpsc::unbounded();
		self.routes.lock().await.insert(channel.clone(), sender);

		self.send_json(json!({
			"uid": self.uid,
			"subscribe": channel,
		}))?;

		debug!("Subscribed to {}", channel);
		Ok(Box::pin(receiver))
	}

	async fn unsubscribe(&mut self, topic: Topic) -> Result<(), ApiError> {
		let channel = topic.channel_for(&self.address);
		self.routes.lock().await.remove(&channel);

		if !self.open {
			return Ok(());
		}

		self.send_json(json!({
			"uid": self.uid,
			"unsubscribe": channel,
		}))?;

		debug!("Unsubscribed from {}", channel);
		Ok(())
	}

	async fn close(&mut self) -> Result<(), ApiError> {
		if !self.open {
			return Ok(());
		}
		self.open = false;

		self.routes.lock().await.clear();
		let sent = self.outgoing.unbounded_send(Message::Close(None));
		self.outgoing.close_channel();
		self.reader.abort();

		if sent.is_err() {
			warn!("Websocket writer for {} stopped before close", self.uid);
			self.writer.abort();
		}

		info!("Closed push channel {} for {}", self.uid, self.address);
		Ok(())
	}
}

impl Drop for WebSocketListener {
	// The writer drains queued frames and stops once `outgoing` is dropped
	fn drop(&mut self) {
		self.reader.abort();
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn decodes_added_removed_and_status_frames() {
		let added = decode_event(
			Topic::UnconfirmedAdded,
			json!({ "meta": { "hash": "AB" }, "transaction": { "type": 16724 } }),
		)
		.unwrap();
		match added {
			PushEvent::Added(tx) => {
				assert_eq!(tx.hash, "AB");
				assert_eq!(tx.group, TransactionGroup::Unconfirmed);
			}
			other => panic!("unexpected event: {:?}", other),
		}

		let removed = decode_event(Topic::PartialRemoved, json!({ "meta": { "hash": "CD" } })).unwrap();
		assert_eq!(
			removed,
			PushEvent::Removed {
				group: TransactionGroup::Partial,
				hash: "CD".to_string(),
			}
		);

		let status = decode_event(
			Topic::Status,
			json!({ "hash": "EF", "code": "Failure_Core_Insufficient_Balance", "deadline": "1" }),
		)
		.unwrap();
		assert_eq!(
			status,
			PushEvent::Status {
				hash: "EF".to_string(),
				code: "Failure_Core_Insufficient_Balance".to_string(),
			}
		);
	}

	#[test]
	fn malformed_frames_surface_as_errors() {
		assert!(decode_event(Topic::Status, json!({ "code": "x" })).is_err());
		assert!(decode_event(Topic::ConfirmedAdded, json!({ "meta": {} })).is_err());
	}

	#[tokio::test]
	async fn frames_are_routed_by_full_channel() {
		let routes: Routes = Arc::new(Mutex::new(HashMap::new()));
		let (sender, mut receiver) = mpsc::unbounded();
		routes
			.lock()
			.await
			.insert(Topic::ConfirmedAdded.channel_for("TADDR"), sender);

		route_frame(
			&routes,
			&json!({
				"topic": "confirmedAdded/TOTHER",
				"data": { "meta": { "hash": "00" } },
			})
			.to_string(),
		)
		.await;
		route_frame(
			&routes,
			&json!({
				"topic": "confirmedAdded/TADDR",
				"data": { "meta": { "hash": "11", "height": "5" } },
			})
			.to_string(),
		)
		.await;
		drop(routes);

		let event = receiver.next().await.unwrap().unwrap();
		match event {
			PushEvent::Added(tx) => {
				assert_eq!(tx.hash, "11");
				assert_eq!(tx.height, Some(5));
			}
			other => panic!("unexpected event: {:?}", other),
		}
		assert!(receiver.next().await.is_none());
	}
}
