//! nsqd TCP 读取器（NsqReader）
//!
//! 以 nsqd 的 V2 TCP 协议订阅 `topic/channel`，把消息解码为 `ConsumedMessage` 流：
//! - 握手：`  V2` 魔数、`SUB`、`RDY`；
//! - 心跳帧回复 `NOP`；
//! - 消息体为合法 JSON 时 `FIN`，否则按 `requeue_delay` 执行 `REQ` 并跳过；
//! - 连接断开或收到错误帧时产出一条错误后结束流，不自动重连。
//!
use crate::error::{DomainError, DomainResult as Result};
use crate::persist::ConsumedMessage;
use chrono::Utc;
use futures_core::stream::BoxStream;
use futures_util::{StreamExt, stream};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::time::timeout;

const FRAME_RESPONSE: u32 = 0;
const FRAME_ERROR: u32 = 1;
const FRAME_MESSAGE: u32 = 2;
const HEARTBEAT: &[u8] = b"_heartbeat_";
/// 时间戳 8 字节 + 尝试次数 2 字节 + 消息标识 16 字节
const MESSAGE_HEADER: usize = 26;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// nsqd 默认 30s 心跳，两个周期无任何帧视为连接失效
const READ_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct NsqReader {
    addr: String,
    topic: String,
    channel: String,
    max_in_flight: u32,
    requeue_delay: Duration,
}

impl NsqReader {
    /// `addr` 为 nsqd TCP 地址，形如 `127.0.0.1:4150`
    pub fn new(addr: impl Into<String>, topic: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            topic: topic.into(),
            channel: channel.into(),
            max_in_flight: 1,
            requeue_delay: Duration::from_millis(1000),
        }
    }

    pub fn max_in_flight(mut self, n: u32) -> Self {
        self.max_in_flight = n.max(1);
        self
    }

    pub fn requeue_delay(mut self, delay: Duration) -> Self {
        self.requeue_delay = delay;
        self
    }

    /// 建立连接并完成订阅，返回 `'static` 消息流
    pub async fn subscribe(self) -> Result<BoxStream<'static, Result<ConsumedMessage>>> {
        let tcp = timeout(CONNECT_TIMEOUT, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| DomainError::event_bus(format!("nsqd connect timed out: {}", self.addr)))?
            .map_err(|e| io_failure("connect", e))?;

        let mut conn = Connection {
            stream: BufStream::new(tcp),
            reader: self,
        };
        conn.handshake().await?;
        tracing::info!(
            addr = %conn.reader.addr,
            topic = %conn.reader.topic,
            channel = %conn.reader.channel,
            "nsq reader subscribed"
        );

        let messages = stream::unfold(Some(conn), |state| async move {
            let mut conn = state?;
            match conn.next_message().await {
                Ok(message) => Some((Ok(message), Some(conn))),
                Err(err) => Some((Err(err), None)),
            }
        });
        Ok(messages.boxed())
    }
}

struct Connection {
    stream: BufStream<TcpStream>,
    reader: NsqReader,
}

impl Connection {
    async fn handshake(&mut self) -> Result<()> {
        self.stream
            .write_all(b"  V2")
            .await
            .map_err(|e| io_failure("magic", e))?;
        let sub = format!("SUB {} {}\n", self.reader.topic, self.reader.channel);
        self.send(&sub).await?;

        match self.read_frame().await? {
            (FRAME_RESPONSE, data) if data == b"OK" => {}
            (FRAME_ERROR, data) => return Err(nsqd_error(&data)),
            (_, data) => {
                return Err(DomainError::event_bus(format!(
                    "unexpected SUB response: {}",
                    String::from_utf8_lossy(&data)
                )));
            }
        }

        let rdy = format!("RDY {}\n", self.reader.max_in_flight);
        self.send(&rdy).await
    }

    async fn next_message(&mut self) -> Result<ConsumedMessage> {
        loop {
            let (kind, data) = self.read_frame().await?;
            match kind {
                FRAME_RESPONSE if data == HEARTBEAT => self.send("NOP\n").await?,
                FRAME_RESPONSE => {}
                FRAME_ERROR => return Err(nsqd_error(&data)),
                FRAME_MESSAGE => {
                    if let Some(message) = self.accept(&data).await? {
                        return Ok(message);
                    }
                }
                other => {
                    tracing::warn!(frame_type = other, "ignoring unknown nsqd frame");
                }
            }
        }
    }

    /// 解码消息帧；消息体不是 JSON 时重新入队并返回 `None`
    async fn accept(&mut self, frame: &[u8]) -> Result<Option<ConsumedMessage>> {
        if frame.len() < MESSAGE_HEADER {
            return Err(DomainError::Parse {
                reason: format!("nsq message frame too short: {} bytes", frame.len()),
            });
        }
        let attempts = u16::from_be_bytes([frame[8], frame[9]]);
        let id = String::from_utf8_lossy(&frame[10..MESSAGE_HEADER]).into_owned();
        let body = &frame[MESSAGE_HEADER..];

        match serde_json::from_slice(body) {
            Ok(data) => {
                self.send(&format!("FIN {id}\n")).await?;
                Ok(Some(ConsumedMessage {
                    id,
                    topic: self.reader.topic.clone(),
                    channel: self.reader.channel.clone(),
                    data,
                    received_at: Utc::now(),
                    attempts: u32::from(attempts),
                }))
            }
            Err(err) => {
                tracing::error!(message_id = %id, attempts, error = %err, "nsq message is not JSON, requeueing");
                let delay = self.reader.requeue_delay.as_millis();
                self.send(&format!("REQ {id} {delay}\n")).await?;
                Ok(None)
            }
        }
    }

    async fn send(&mut self, command: &str) -> Result<()> {
        self.stream
            .write_all(command.as_bytes())
            .await
            .map_err(|e| io_failure("write", e))?;
        self.stream.flush().await.map_err(|e| io_failure("flush", e))
    }

    async fn read_frame(&mut self) -> Result<(u32, Vec<u8>)> {
        let read = async {
            let size = self.stream.read_u32().await? as usize;
            let kind = self.stream.read_u32().await?;
            let mut data = vec![0u8; size.saturating_sub(4)];
            self.stream.read_exact(&mut data).await?;
            Ok::<_, std::io::Error>((kind, data))
        };

        timeout(READ_TIMEOUT, read)
            .await
            .map_err(|_| DomainError::event_bus("nsqd read timed out"))?
            .map_err(|e| io_failure("read", e))
    }
}

fn io_failure(op: &str, err: std::io::Error) -> DomainError {
    DomainError::event_bus(format!("nsqd {op} failed: {err}"))
}

fn nsqd_error(data: &[u8]) -> DomainError {
    DomainError::event_bus(format!("nsqd error: {}", String::from_utf8_lossy(data)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    fn frame(kind: u32, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(data.len() as u32 + 4).to_be_bytes());
        out.extend_from_slice(&kind.to_be_bytes());
        out.extend_from_slice(data);
        out
    }

    fn message_frame(id: &[u8; 16], attempts: u16, body: &[u8]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&0i64.to_be_bytes());
        data.extend_from_slice(&attempts.to_be_bytes());
        data.extend_from_slice(id);
        data.extend_from_slice(body);
        frame(FRAME_MESSAGE, &data)
    }

    #[tokio::test]
    async fn reader_finishes_json_and_requeues_the_rest() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let nsqd = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            let mut read = BufReader::new(read);

            let mut magic = [0u8; 4];
            read.read_exact(&mut magic).await.unwrap();
            assert_eq!(&magic, b"  V2");

            let mut lines = Vec::new();
            let mut line = String::new();
            read.read_line(&mut line).await.unwrap();
            lines.push(std::mem::take(&mut line));
            write.write_all(&frame(FRAME_RESPONSE, b"OK")).await.unwrap();
            read.read_line(&mut line).await.unwrap();
            lines.push(std::mem::take(&mut line));

            write.write_all(&frame(FRAME_RESPONSE, HEARTBEAT)).await.unwrap();
            read.read_line(&mut line).await.unwrap();
            lines.push(std::mem::take(&mut line));

            write
                .write_all(&message_frame(b"0000000000000bad", 1, b"not json"))
                .await
                .unwrap();
            read.read_line(&mut line).await.unwrap();
            lines.push(std::mem::take(&mut line));

            write
                .write_all(&message_frame(b"00000000000000a1", 3, br#"{"n":1}"#))
                .await
                .unwrap();
            read.read_line(&mut line).await.unwrap();
            lines.push(std::mem::take(&mut line));
            lines
        });

        let mut messages = NsqReader::new(addr, "events", "events_channel")
            .requeue_delay(Duration::from_millis(250))
            .subscribe()
            .await
            .unwrap();
        let first = messages.next().await.unwrap().unwrap();
        assert_eq!(first.id, "00000000000000a1");
        assert_eq!(first.topic, "events");
        assert_eq!(first.attempts, 3);
        assert_eq!(first.data, serde_json::json!({ "n": 1 }));

        let lines = nsqd.await.unwrap();
        assert_eq!(
            lines,
            vec![
                "SUB events events_channel\n",
                "RDY 1\n",
                "NOP\n",
                "REQ 0000000000000bad 250\n",
                "FIN 00000000000000a1\n",
            ]
        );

        // 对端关闭后产出一条错误并结束
        assert!(messages.next().await.unwrap().is_err());
        assert!(messages.next().await.is_none());
    }
}
