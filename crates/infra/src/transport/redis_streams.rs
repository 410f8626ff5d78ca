//! Redis Streams queue transport (durable, at-least-once delivery).
//!
//! - **Queue** = one stream key; entries carry `task_id` and `payload` fields
//! - **Consumer group** shared by every slot of a stage; each entry goes to one slot
//! - **Redelivery**: entries left unacknowledged longer than the visibility
//!   timeout are re-claimed with `XAUTOCLAIM` before new entries are read
//! - **Dead letters**: `reject` copies the entry to `{queue}:dlq`, then `XACK`s it
//! - **Timeouts**: every command is bounded; a stalled broker surfaces as a
//!   connection error so consumers reconnect
//!
//! Durability is whatever the Redis server is configured for (AOF recommended).

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::Value;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use scout_queue::{Delivery, QueueConsumer, QueueTransport, TransportError};

fn map_redis_error(operation: &str, err: redis::RedisError) -> TransportError {
    if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() || err.is_timeout() {
        TransportError::Connection(format!("{operation}: {err}"))
    } else {
        TransportError::Command(format!("{operation} failed: {err}"))
    }
}

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Run a broker round trip with an upper bound on its duration.
async fn within<T, F>(limit: Duration, operation: &str, fut: F) -> Result<T, TransportError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| TransportError::Connection(format!("{operation}: timed out after {limit:?}")))
}

async fn bounded<T, F>(limit: Duration, operation: &str, fut: F) -> Result<T, TransportError>
where
    F: Future<Output = redis::RedisResult<T>>,
{
    within(limit, operation, fut)
        .await?
        .map_err(|e| map_redis_error(operation, e))
}

fn dlq_key(queue: &str) -> String {
    format!("{queue}:dlq")
}

#[derive(Clone)]
pub struct RedisStreamsTransport {
    client: Arc<redis::Client>,
    group: String,
    visibility_timeout: Duration,
    command_timeout: Duration,
    /// Lazily opened connection used for publishing.
    publisher: Arc<Mutex<Option<MultiplexedConnection>>>,
}

impl std::fmt::Debug for RedisStreamsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStreamsTransport")
            .field("group", &self.group)
            .field("visibility_timeout", &self.visibility_timeout)
            .field("command_timeout", &self.command_timeout)
            .finish_non_exhaustive()
    }
}

impl RedisStreamsTransport {
    /// Create a transport for `redis_url`. No connection is opened until the
    /// first publish or consumer.
    pub fn new(
        redis_url: impl AsRef<str>,
        group: impl Into<String>,
        visibility_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        Ok(Self {
            client: Arc::new(client),
            group: group.into(),
            visibility_timeout,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            publisher: Arc::new(Mutex::new(None)),
        })
    }

    /// Bound every broker command (and connection attempt) by `timeout`.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    async fn connect(&self) -> Result<MultiplexedConnection, TransportError> {
        bounded(
            self.command_timeout,
            "connect",
            self.client.get_multiplexed_tokio_connection(),
        )
        .await
    }

    /// Shared publishing connection, opened on first use.
    ///
    /// The multiplexed connection is cloned out so commands never run under
    /// the lock.
    async fn publisher_connection(&self) -> Result<MultiplexedConnection, TransportError> {
        let mut guard = self.publisher.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self.connect().await?;
        *guard = Some(conn.clone());
        Ok(conn)
    }

    /// Ensure the consumer group exists on `queue` (idempotent).
    async fn ensure_group(
        &self,
        conn: &mut MultiplexedConnection,
        queue: &str,
    ) -> Result<(), TransportError> {
        let created: redis::RedisResult<String> = within(
            self.command_timeout,
            "XGROUP CREATE",
            redis::cmd("XGROUP")
                .arg("CREATE")
                .arg(queue)
                .arg(&self.group)
                .arg("0")
                .arg("MKSTREAM")
                .query_async(conn),
        )
        .await?;

        match created {
            Ok(_) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(map_redis_error("XGROUP CREATE", e)),
        }
    }
}

#[async_trait]
impl QueueTransport for RedisStreamsTransport {
    #[instrument(skip(self, payload), fields(queue = %queue, task_id = %key), err)]
    async fn publish(&self, queue: &str, key: &str, payload: &[u8]) -> Result<(), TransportError> {
        let mut conn = self.publisher_connection().await?;

        let added: Result<String, TransportError> = bounded(
            self.command_timeout,
            "XADD",
            redis::cmd("XADD")
                .arg(queue)
                .arg("*")
                .arg("task_id")
                .arg(key)
                .arg("payload")
                .arg(payload)
                .query_async(&mut conn),
        )
        .await;

        match added {
            Ok(_) => Ok(()),
            Err(err) => {
                if err.is_connection() {
                    // Reconnect on the next publish.
                    *self.publisher.lock().await = None;
                }
                Err(err)
            }
        }
    }

    async fn consumer(
        &self,
        queue: &str,
        consumer: &str,
    ) -> Result<Box<dyn QueueConsumer>, TransportError> {
        let mut conn = self.connect().await?;
        self.ensure_group(&mut conn, queue).await?;

        Ok(Box::new(RedisStreamsConsumer {
            conn,
            queue: queue.to_string(),
            group: self.group.clone(),
            consumer: consumer.to_string(),
            min_idle_ms: self.visibility_timeout.as_millis() as u64,
            command_timeout: self.command_timeout,
            claim_cursor: "0-0".to_string(),
            buffered: VecDeque::new(),
        }))
    }
}

struct RedisStreamsConsumer {
    conn: MultiplexedConnection,
    queue: String,
    group: String,
    consumer: String,
    min_idle_ms: u64,
    command_timeout: Duration,
    claim_cursor: String,
    buffered: VecDeque<Delivery>,
}

impl RedisStreamsConsumer {
    /// Take over one entry that another consumer left unacknowledged.
    async fn claim_stale(&mut self) -> Result<Option<Delivery>, TransportError> {
        let reply: Value = bounded(
            self.command_timeout,
            "XAUTOCLAIM",
            redis::cmd("XAUTOCLAIM")
                .arg(&self.queue)
                .arg(&self.group)
                .arg(&self.consumer)
                .arg(self.min_idle_ms)
                .arg(&self.claim_cursor)
                .arg("COUNT")
                .arg(1)
                .query_async(&mut self.conn),
        )
        .await?;

        // Reply: [next_cursor, [entries...], (deleted ids, Redis >= 7)]
        let Value::Bulk(parts) = reply else {
            return Err(TransportError::Command("unexpected XAUTOCLAIM reply".to_string()));
        };
        let mut parts = parts.into_iter();
        if let Some(cursor) = parts.next().and_then(|v| value_to_string(&v)) {
            self.claim_cursor = cursor;
        }

        let entries = match parts.next() {
            Some(Value::Bulk(entries)) => entries,
            _ => return Ok(None),
        };
        for entry in entries {
            match parse_stream_entry(&entry) {
                Ok(Some(mut delivery)) => {
                    delivery.redelivered = true;
                    self.buffered.push_back(delivery);
                }
                // Entry trimmed from the stream while pending; nothing to process.
                Ok(None) => {}
                Err(err) => warn!(queue = %self.queue, error = %err, "skipping unreadable stream entry"),
            }
        }
        Ok(self.buffered.pop_front())
    }

    async fn read_new(&mut self, wait: Duration) -> Result<Option<Delivery>, TransportError> {
        let block_ms = wait.as_millis().max(1) as u64;
        // The server holds the reply for up to `block_ms`.
        let limit = Duration::from_millis(block_ms) + self.command_timeout;
        let reply: Value = bounded(
            limit,
            "XREADGROUP",
            redis::cmd("XREADGROUP")
                .arg("GROUP")
                .arg(&self.group)
                .arg(&self.consumer)
                .arg("COUNT")
                .arg(1)
                .arg("BLOCK")
                .arg(block_ms)
                .arg("STREAMS")
                .arg(&self.queue)
                .arg(">")
                .query_async(&mut self.conn),
        )
        .await?;

        // Reply: nil on timeout, else [[stream, [entries...]]]
        let streams = match reply {
            Value::Nil => return Ok(None),
            Value::Bulk(streams) => streams,
            _ => return Err(TransportError::Command("unexpected XREADGROUP reply".to_string())),
        };

        for stream in streams {
            let Value::Bulk(mut pair) = stream else { continue };
            if pair.len() < 2 {
                continue;
            }
            let Value::Bulk(entries) = pair.swap_remove(1) else { continue };
            for entry in entries {
                match parse_stream_entry(&entry) {
                    Ok(Some(delivery)) => self.buffered.push_back(delivery),
                    Ok(None) => {}
                    Err(err) => warn!(queue = %self.queue, error = %err, "skipping unreadable stream entry"),
                }
            }
        }
        Ok(self.buffered.pop_front())
    }

    async fn xack(&mut self, id: &str) -> Result<(), TransportError> {
        let _: u64 = bounded(
            self.command_timeout,
            "XACK",
            redis::cmd("XACK")
                .arg(&self.queue)
                .arg(&self.group)
                .arg(id)
                .query_async(&mut self.conn),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl QueueConsumer for RedisStreamsConsumer {
    async fn next(&mut self, wait: Duration) -> Result<Option<Delivery>, TransportError> {
        if let Some(delivery) = self.buffered.pop_front() {
            return Ok(Some(delivery));
        }
        if let Some(delivery) = self.claim_stale().await? {
            debug!(queue = %self.queue, id = %delivery.tag, "re-claimed stale entry");
            return Ok(Some(delivery));
        }
        self.read_new(wait).await
    }

    async fn ack(&mut self, delivery: &Delivery) -> Result<(), TransportError> {
        self.xack(&delivery.tag).await
    }

    #[instrument(skip(self, delivery), fields(queue = %self.queue, id = %delivery.tag), err)]
    async fn reject(&mut self, delivery: &Delivery, reason: &str) -> Result<(), TransportError> {
        let _: String = bounded(
            self.command_timeout,
            "DLQ XADD",
            redis::cmd("XADD")
                .arg(dlq_key(&self.queue))
                .arg("*")
                .arg("original_message_id")
                .arg(&delivery.tag)
                .arg("task_id")
                .arg(&delivery.key)
                .arg("reason")
                .arg(reason)
                .arg("failed_at")
                .arg(chrono::Utc::now().to_rfc3339())
                .arg("payload")
                .arg(delivery.payload.as_slice())
                .query_async(&mut self.conn),
        )
        .await?;

        warn!(queue = %self.queue, id = %delivery.tag, reason, "message sent to dead-letter queue");
        self.xack(&delivery.tag).await
    }
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Data(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        Value::Status(s) => Some(s.clone()),
        _ => None,
    }
}

/// Parse `[id, [field, value, ...]]` into a delivery.
///
/// Returns `Ok(None)` for entries whose body was deleted (`[id, nil]`).
fn parse_stream_entry(entry: &Value) -> Result<Option<Delivery>, TransportError> {
    let Value::Bulk(parts) = entry else {
        return Err(TransportError::Malformed("invalid entry format".to_string()));
    };
    if parts.len() < 2 {
        return Err(TransportError::Malformed("entry too short".to_string()));
    }

    let id = value_to_string(&parts[0])
        .ok_or_else(|| TransportError::Malformed("invalid message id".to_string()))?;

    let fields_vec = match &parts[1] {
        Value::Bulk(v) => v,
        Value::Nil => return Ok(None),
        _ => return Err(TransportError::Malformed("invalid fields format".to_string())),
    };

    let mut fields: HashMap<String, Vec<u8>> = HashMap::new();
    for chunk in fields_vec.chunks(2) {
        if let [Value::Data(key), Value::Data(value)] = chunk {
            fields.insert(String::from_utf8_lossy(key).into_owned(), value.clone());
        }
    }

    // A missing payload is still handed out so the stage can dead-letter it.
    let key = fields
        .get("task_id")
        .map(|v| String::from_utf8_lossy(v).into_owned())
        .unwrap_or_default();
    let payload = fields.remove("payload").unwrap_or_default();

    Ok(Some(Delivery {
        tag: id,
        key,
        payload,
        redelivered: false,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(s: &str) -> Value {
        Value::Data(s.as_bytes().to_vec())
    }

    #[test]
    fn parses_entry_fields() {
        let entry = Value::Bulk(vec![
            data("1700000000000-0"),
            Value::Bulk(vec![data("task_id"), data("abc"), data("payload"), data("{}")]),
        ]);

        let delivery = parse_stream_entry(&entry).unwrap().unwrap();
        assert_eq!(delivery.tag, "1700000000000-0");
        assert_eq!(delivery.key, "abc");
        assert_eq!(delivery.payload, b"{}");
        assert!(!delivery.redelivered);
    }

    #[test]
    fn deleted_entries_are_skipped() {
        let entry = Value::Bulk(vec![data("1-0"), Value::Nil]);
        assert!(parse_stream_entry(&entry).unwrap().is_none());
    }

    #[test]
    fn garbage_entries_are_malformed() {
        assert!(matches!(
            parse_stream_entry(&Value::Int(3)),
            Err(TransportError::Malformed(_))
        ));
    }

    #[test]
    fn dead_letters_go_next_to_the_queue() {
        assert_eq!(dlq_key("scout:raw_tasks"), "scout:raw_tasks:dlq");
    }

    /// Accepts connections and never writes a byte back.
    async fn silent_broker() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        format!("redis://{addr}")
    }

    fn transport(url: &str) -> RedisStreamsTransport {
        RedisStreamsTransport::new(url, "scout", Duration::from_secs(60))
            .unwrap()
            .with_command_timeout(Duration::from_millis(200))
    }

    #[tokio::test]
    async fn publish_to_a_silent_broker_times_out() {
        let transport = transport(&silent_broker().await);

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            transport.publish("q", "k", b"{}"),
        )
        .await
        .expect("publish must not hang");

        assert!(matches!(result, Err(TransportError::Connection(_))));
    }

    #[tokio::test]
    async fn stalled_publish_does_not_block_other_publishers() {
        let transport = transport(&silent_broker().await);

        let (first, second) = tokio::time::timeout(
            Duration::from_secs(5),
            async { tokio::join!(transport.publish("q", "a", b"{}"), transport.publish("q", "b", b"{}")) },
        )
        .await
        .expect("publishers must not hang");

        assert!(first.unwrap_err().is_connection());
        assert!(second.unwrap_err().is_connection());
    }

    #[tokio::test]
    async fn consumer_against_a_silent_broker_times_out() {
        let transport = transport(&silent_broker().await);

        let result = tokio::time::timeout(Duration::from_secs(5), transport.consumer("q", "slot-0"))
            .await
            .expect("consumer setup must not hang");

        assert!(matches!(result, Err(TransportError::Connection(_))));
    }
}
