use std::{convert::TryFrom, time::Duration};

use anyhow::{anyhow, Result};
use chrono::Utc;

pub fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

pub fn ttl_to_ms(ttl: Duration) -> Result<i64> {
    let millis = u64::try_from(ttl.as_millis())
        .map_err(|_| anyhow!("ttl {ttl:?} is too large"))?;
    to_i64(millis)
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
