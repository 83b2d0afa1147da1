// ============================================================================
// Redis Backend
// ============================================================================
//
// Each pool slot owns a dedicated (non-multiplexed) connection: WATCH state
// lives on the server-side connection, so it cannot be shared.
//
// ============================================================================

use super::{Command, RawConnection, Reply, StoreBackend};
use crate::core::{FieldMap, Result, StoreError};
use async_trait::async_trait;

/// Backend talking to a Redis-compatible server.
pub struct RedisStore {
    client: ::redis::Client,
    target: String,
}

impl RedisStore {
    /// Open a client for `url` (`redis://[:password@]host[:port][/db]`).
    ///
    /// No connection is made until the pool asks for one.
    pub fn open(url: &str) -> Result<Self> {
        let client = ::redis::Client::open(url)
            .map_err(|e| StoreError::InvalidConfig(e.to_string()))?;
        let info = client.get_connection_info();
        Ok(Self {
            target: format!("{}/{}", info.addr, info.redis.db),
            client,
        })
    }
}

#[async_trait]
impl StoreBackend for RedisStore {
    async fn connect(&self) -> Result<Box<dyn RawConnection>> {
        #[allow(deprecated)]
        let connection = self.client.get_async_connection().await?;
        Ok(Box::new(RedisConnection { connection }))
    }

    fn describe(&self) -> String {
        format!("redis://{}", self.target)
    }
}

struct RedisConnection {
    connection: ::redis::aio::Connection,
}

fn to_cmd(command: &Command) -> ::redis::Cmd {
    match command {
        Command::Exists { key } => {
            let mut cmd = ::redis::cmd("EXISTS");
            cmd.arg(key);
            cmd
        }
        Command::HGetAll { key } => {
            let mut cmd = ::redis::cmd("HGETALL");
            cmd.arg(key);
            cmd
        }
        Command::HIncrBy { key, field, delta } => {
            let mut cmd = ::redis::cmd("HINCRBY");
            cmd.arg(key).arg(field).arg(*delta);
            cmd
        }
        Command::ZIncrBy { key, member, delta } => {
            let mut cmd = ::redis::cmd("ZINCRBY");
            cmd.arg(key).arg(*delta).arg(member);
            cmd
        }
        Command::ZRevRangeWithScores { key, start, stop } => {
            let mut cmd = ::redis::cmd("ZREVRANGE");
            cmd.arg(key).arg(*start).arg(*stop).arg("WITHSCORES");
            cmd
        }
        Command::Ping => ::redis::cmd("PING"),
    }
}

fn to_reply(command: &Command, value: &::redis::Value) -> Result<Reply> {
    let unexpected = |err: ::redis::RedisError| {
        StoreError::ExecutionError(format!("unexpected {} reply: {}", command.name(), err))
    };
    let reply = match command {
        Command::Exists { .. } | Command::HIncrBy { .. } => {
            Reply::Integer(::redis::from_redis_value::<i64>(value).map_err(unexpected)?)
        }
        Command::HGetAll { .. } => {
            Reply::Fields(::redis::from_redis_value::<FieldMap>(value).map_err(unexpected)?)
        }
        Command::ZIncrBy { .. } => {
            Reply::Score(::redis::from_redis_value::<f64>(value).map_err(unexpected)?)
        }
        Command::ZRevRangeWithScores { .. } => Reply::Ranked(
            ::redis::from_redis_value::<Vec<(String, f64)>>(value).map_err(unexpected)?,
        ),
        Command::Ping => Reply::Pong,
    };
    Ok(reply)
}

/// Match EXEC replies to the commands queued in the transaction.
fn decode_exec(
    commands: &[Command],
    values: Option<Vec<::redis::Value>>,
) -> Result<Option<Vec<Reply>>> {
    let Some(values) = values else {
        return Ok(None);
    };

    if values.len() != commands.len() {
        return Err(StoreError::ExecutionError(format!(
            "EXEC returned {} replies for {} commands",
            values.len(),
            commands.len()
        )));
    }

    commands
        .iter()
        .zip(values.iter())
        .map(|(command, value)| to_reply(command, value))
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

#[async_trait]
impl RawConnection for RedisConnection {
    async fn query(&mut self, command: Command) -> Result<Reply> {
        let value: ::redis::Value = to_cmd(&command)
            .query_async(&mut self.connection)
            .await?;
        to_reply(&command, &value)
    }

    async fn watch(&mut self, keys: &[String]) -> Result<()> {
        ::redis::cmd("WATCH")
            .arg(keys)
            .query_async::<_, ()>(&mut self.connection)
            .await?;
        Ok(())
    }

    async fn unwatch(&mut self) -> Result<()> {
        ::redis::cmd("UNWATCH")
            .query_async::<_, ()>(&mut self.connection)
            .await?;
        Ok(())
    }

    async fn exec(&mut self, commands: Vec<Command>) -> Result<Option<Vec<Reply>>> {
        let mut pipe = ::redis::pipe();
        pipe.atomic();
        for command in &commands {
            pipe.add_command(to_cmd(command));
        }

        // A nil EXEC reply (watched key moved) decodes as `None`.
        let values: Option<Vec<::redis::Value>> = pipe.query_async(&mut self.connection).await?;
        decode_exec(&commands, values)
    }
}
