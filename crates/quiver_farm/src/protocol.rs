use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;

use crate::RemoteError;

/// Operations the coordinator invokes on a worker
pub mod methods {
  pub const CHILD_INIT: &str = "childInit";
  pub const INIT: &str = "init";
  pub const RUN: &str = "run";
}

/// A message on the wire between the coordinator and a worker
///
/// Messages are written as one JSON document per line. Requests flow in both directions:
/// the coordinator calls worker operations and workers call back into the coordinator.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Message {
  Request(Request),
  Response(Response),
  /// Asks a worker to exit
  Die,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
  /// Correlates the response, absent for fire-and-forget calls
  pub idx: Option<u64>,

  /// Id of the worker the call is sent to or originates from
  pub child: u64,

  pub method: String,

  pub args: Vec<Value>,

  #[serde(default = "default_await_response")]
  pub await_response: bool,
}

fn default_await_response() -> bool {
  true
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ContentType {
  Data,
  Error,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
  pub idx: u64,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub child: Option<u64>,

  pub content_type: ContentType,

  pub content: Value,
}

impl Response {
  pub fn from_result(idx: u64, child: Option<u64>, result: anyhow::Result<Value>) -> Self {
    match result {
      Ok(content) => Response {
        idx,
        child,
        content_type: ContentType::Data,
        content,
      },
      Err(error) => Response {
        idx,
        child,
        content_type: ContentType::Error,
        content: serde_json::to_value(RemoteError::from(&error)).unwrap_or(Value::Null),
      },
    }
  }

  pub fn into_result(self) -> anyhow::Result<Value> {
    match self.content_type {
      ContentType::Data => Ok(self.content),
      ContentType::Error => {
        let error: RemoteError = serde_json::from_value(self.content)?;
        Err(error.into())
      }
    }
  }
}

pub fn encode(message: &Message) -> anyhow::Result<Vec<u8>> {
  let mut line = serde_json::to_vec(message)?;
  line.push(b'\n');
  Ok(line)
}

pub fn decode(line: &str) -> anyhow::Result<Message> {
  Ok(serde_json::from_str(line)?)
}

pub async fn write_message<W>(writer: &mut W, message: &Message) -> anyhow::Result<()>
where
  W: AsyncWrite + Unpin,
{
  writer.write_all(&encode(message)?).await?;
  writer.flush().await?;
  Ok(())
}
