//! Seed store kept on the broker, shared by every coordinator process.
//!
//! Each seed is a hash under `{prefix}seed:{shadow_id}` with the fields
//! `url`, `public`, `state` and, once archived, `archival_url` and
//! `harvested_at`. A group is a list of member shadow ids under
//! `{prefix}group:{shadow_id}`. Inserts and state changes run as Lua
//! scripts, so each one is atomic on the server.

use crate::store::check_new_seed;
use crate::{ArchivalInfo, BrokerConfig, CaptureState, Seed, SeedStore, SeedsGroup, ShadowId, StoreConfig, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

// KEYS: optional group key, then seed keys. ARGV[1]: number of group keys,
// then shadow id, url, public and state per seed. Returns the 1-based index
// of the first key that already exists, or 0 once everything is written.
const INSERT_SCRIPT: &str = r"
local first = 1 + tonumber(ARGV[1])
for i = 1, #KEYS do
  if redis.call('EXISTS', KEYS[i]) == 1 then return i end
end
for i = first, #KEYS do
  local base = 1 + (i - first) * 4
  redis.call('HSET', KEYS[i], 'url', ARGV[base + 2], 'public', ARGV[base + 3], 'state', ARGV[base + 4])
  if first == 2 then redis.call('RPUSH', KEYS[1], ARGV[base + 1]) end
end
return 0
";

// ARGV: expected state ('' for any), next state.
const SET_STATE_SCRIPT: &str = r"
local current = redis.call('HGET', KEYS[1], 'state')
if not current then return {0, ''} end
if ARGV[1] ~= '' and current ~= ARGV[1] then return {1, current} end
if ARGV[2] ~= 'DoneSuccess' and redis.call('HEXISTS', KEYS[1], 'archival_url') == 1 then
  return {2, current}
end
redis.call('HSET', KEYS[1], 'state', ARGV[2])
return {3, current}
";

// ARGV: archival url, harvest time.
const SET_METADATA_SCRIPT: &str = r"
local current = redis.call('HGET', KEYS[1], 'state')
if not current then return {0, ''} end
if current ~= 'DoneSuccess' then return {2, current} end
redis.call('HSET', KEYS[1], 'archival_url', ARGV[1], 'harvested_at', ARGV[2])
return {3, current}
";

const MISSING: i64 = 0;
const CONFLICT: i64 = 1;
const REJECTED: i64 = 2;

pub struct RedisSeedStore {
    conn: ConnectionManager,
    key_prefix: String,
    insert: Script,
    set_state: Script,
    set_metadata: Script,
}

impl RedisSeedStore {
    pub async fn connect(config: &StoreConfig, broker: &BrokerConfig) -> Result<Self, StoreError> {
        let url = config.url_or(broker);
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!("Connected to seed store at {} (prefix: {})", url, config.key_prefix);

        Ok(Self {
            conn,
            key_prefix: config.key_prefix.clone(),
            insert: Script::new(INSERT_SCRIPT),
            set_state: Script::new(SET_STATE_SCRIPT),
            set_metadata: Script::new(SET_METADATA_SCRIPT),
        })
    }

    fn seed_key(&self, shadow_id: &ShadowId) -> String {
        format!("{}seed:{}", self.key_prefix, shadow_id)
    }

    fn group_key(&self, shadow_id: &ShadowId) -> String {
        format!("{}group:{}", self.key_prefix, shadow_id)
    }

    async fn insert(&self, group: Option<&ShadowId>, seeds: &[Seed]) -> Result<(), StoreError> {
        if seeds.is_empty() {
            return Err(StoreError::EmptyBatch);
        }
        let mut batch = HashSet::new();
        for seed in seeds {
            check_new_seed(seed)?;
            if !batch.insert(&seed.shadow_id) {
                return Err(StoreError::DuplicateShadowId(seed.shadow_id.to_string()));
            }
        }

        let mut invocation = self.insert.prepare_invoke();
        invocation.arg(usize::from(group.is_some()));
        if let Some(group) = group {
            invocation.key(self.group_key(group));
        }
        for seed in seeds {
            invocation
                .key(self.seed_key(&seed.shadow_id))
                .arg(seed.shadow_id.as_str())
                .arg(&seed.url)
                .arg(if seed.public { "1" } else { "0" })
                .arg(seed.state.as_str());
        }

        let mut conn = self.conn.clone();
        let taken: usize = invocation.invoke_async(&mut conn).await?;
        if taken == 0 {
            return Ok(());
        }
        let taken_id = match group {
            Some(group) if taken == 1 => group.to_string(),
            Some(_) => seeds[taken - 2].shadow_id.to_string(),
            None => seeds[taken - 1].shadow_id.to_string(),
        };
        Err(StoreError::DuplicateShadowId(taken_id))
    }

    async fn write_state(
        &self,
        shadow_id: &ShadowId,
        expected: Option<CaptureState>,
        next: CaptureState,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let (code, current): (i64, String) = self
            .set_state
            .key(self.seed_key(shadow_id))
            .arg(expected.map(|state| state.as_str()).unwrap_or(""))
            .arg(next.as_str())
            .invoke_async(&mut conn)
            .await?;

        match code {
            MISSING => Err(StoreError::SeedNotFound(shadow_id.to_string())),
            CONFLICT => Err(StoreError::StateConflict {
                shadow_id: shadow_id.to_string(),
                expected: expected.unwrap_or(next),
                actual: parse_state(&current)?,
            }),
            REJECTED => Err(StoreError::InvariantViolation(format!(
                "seed {shadow_id} has archive details and cannot become {next}"
            ))),
            _ => {
                debug!(shadow_id = %shadow_id, from = %current, to = %next, "Stored seed state");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl SeedStore for RedisSeedStore {
    async fn save(&self, seeds: &[Seed]) -> Result<(), StoreError> {
        self.insert(None, seeds).await
    }

    async fn save_group(&self, group: &SeedsGroup) -> Result<(), StoreError> {
        if group.shadow_id.is_empty() {
            return Err(StoreError::InvariantViolation("group shadow id is empty".to_string()));
        }
        self.insert(Some(&group.shadow_id), &group.seeds).await
    }

    async fn get_group(&self, shadow_id: &ShadowId) -> Result<SeedsGroup, StoreError> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn.lrange(self.group_key(shadow_id), 0, -1).await?;
        if members.is_empty() {
            return Err(StoreError::GroupNotFound(shadow_id.to_string()));
        }

        let members: Vec<ShadowId> = members.into_iter().map(ShadowId::from).collect();
        let mut pipe = redis::pipe();
        for member in &members {
            pipe.hgetall(self.seed_key(member));
        }
        let rows: Vec<HashMap<String, String>> = pipe.query_async(&mut conn).await?;

        let seeds = members
            .into_iter()
            .zip(rows)
            .map(|(member, row)| seed_from_row(member, row))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(SeedsGroup {
            seeds,
            shadow_id: shadow_id.clone(),
        })
    }

    async fn get_seed(&self, shadow_id: &ShadowId) -> Result<Seed, StoreError> {
        let mut conn = self.conn.clone();
        let row: HashMap<String, String> = conn.hgetall(self.seed_key(shadow_id)).await?;
        seed_from_row(shadow_id.clone(), row)
    }

    async fn update_state(&self, shadow_id: &ShadowId, state: CaptureState) -> Result<(), StoreError> {
        self.write_state(shadow_id, None, state).await
    }

    async fn compare_and_set_state(
        &self,
        shadow_id: &ShadowId,
        expected: CaptureState,
        next: CaptureState,
    ) -> Result<(), StoreError> {
        self.write_state(shadow_id, Some(expected), next).await
    }

    async fn update_metadata(
        &self,
        shadow_id: &ShadowId,
        archival_url: &str,
        harvested_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if archival_url.is_empty() {
            return Err(StoreError::InvariantViolation("archival URL is empty".to_string()));
        }
        let mut conn = self.conn.clone();
        let (code, current): (i64, String) = self
            .set_metadata
            .key(self.seed_key(shadow_id))
            .arg(archival_url)
            .arg(harvested_at.to_rfc3339_opts(SecondsFormat::Millis, true))
            .invoke_async(&mut conn)
            .await?;

        match code {
            MISSING => Err(StoreError::SeedNotFound(shadow_id.to_string())),
            REJECTED => Err(StoreError::InvariantViolation(format!(
                "seed {shadow_id} is {current}, archive details need DoneSuccess"
            ))),
            _ => Ok(()),
        }
    }
}

fn parse_state(raw: &str) -> Result<CaptureState, StoreError> {
    raw.parse()
        .map_err(|e: crate::InvalidStateError| StoreError::Backend(format!("stored state: {e}")))
}

/// Rebuild a seed from its hash. An empty hash means the key does not exist.
fn seed_from_row(shadow_id: ShadowId, mut row: HashMap<String, String>) -> Result<Seed, StoreError> {
    if row.is_empty() {
        return Err(StoreError::SeedNotFound(shadow_id.to_string()));
    }
    let field = |row: &mut HashMap<String, String>, name: &str| {
        row.remove(name)
            .ok_or_else(|| StoreError::Backend(format!("seed {shadow_id} has no {name} field")))
    };

    let url = field(&mut row, "url")?;
    let public = field(&mut row, "public")? == "1";
    let state = parse_state(&field(&mut row, "state")?)?;
    let archive = match (row.remove("archival_url"), row.remove("harvested_at")) {
        (Some(archival_url), Some(harvested_at)) => {
            let harvested_at = DateTime::parse_from_rfc3339(&harvested_at)
                .map_err(|e| StoreError::Backend(format!("seed {shadow_id} harvest time: {e}")))?
                .with_timezone(&Utc);
            Some(ArchivalInfo {
                archival_url,
                harvested_at,
            })
        }
        (None, None) => None,
        _ => {
            return Err(StoreError::Backend(format!(
                "seed {shadow_id} has incomplete archive details"
            )))
        }
    };

    Ok(Seed {
        url,
        public,
        state,
        archive,
        shadow_id,
    })
}
