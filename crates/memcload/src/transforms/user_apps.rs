//! 📤 Egress: `AppsInstalled` → `UserApps` protobuf → [`Entry`].
//!
//! The shards store one `UserApps` message per device, keyed `dev_type:dev_id`.
//! The message is derived with prost instead of generated from a `.proto`, so the
//! schema lives right here:
//!
//! ```text
//! message UserApps {
//!     repeated uint32 apps = 1 [packed=true];
//!     optional double lat = 2;
//!     optional double lon = 3;
//! }
//! ```

use anyhow::{Context, Result, ensure};
use prost::Message;
use tracing::info;

use super::{AppsInstalled, parse_line};
use crate::common::Entry;

/// 🧬 The wire message. Field tags are load-bearing; readers on the other side depend on them.
#[derive(Clone, PartialEq, Message)]
pub(crate) struct UserApps {
    #[prost(uint32, repeated, packed = "true", tag = "1")]
    pub apps: Vec<u32>,
    #[prost(double, optional, tag = "2")]
    pub lat: Option<f64>,
    #[prost(double, optional, tag = "3")]
    pub lon: Option<f64>,
}

impl AppsInstalled {
    /// 🔑 `idfa:1rfw452y52g2gq4g`
    pub(crate) fn store_key(&self) -> String {
        format!("{}:{}", self.dev_type, self.dev_id)
    }

    pub(crate) fn to_user_apps(&self) -> UserApps {
        UserApps {
            apps: self.apps.clone(),
            lat: Some(self.lat),
            lon: Some(self.lon),
        }
    }

    /// 📦 Key + encoded bytes, ready for a batch.
    pub(crate) fn to_entry(&self) -> Entry {
        Entry {
            key: self.store_key(),
            value: self.to_user_apps().encode_to_vec(),
        }
    }
}

const SELFTEST_LINES: [&str; 3] = [
    "idfa\t1rfw452y52g2gq4g\t55.55\t42.42\t1423,43,567,3,7,23",
    "gaid\t7rfw452y52g2gq4g\t55.55\t42.42\t7423,424",
    "dvid\tlinux-box\t-33.8688\t151.2093\t1,2,3",
];

/// 🧪 `--test` mode: encode the sample lines, decode them back, compare.
///
/// A smoke check for the wire format that doesn't need a single shard to be up.
pub fn selftest() -> Result<()> {
    for line in SELFTEST_LINES {
        let record = parse_line(line).with_context(|| format!("💀 selftest line refused to parse: {line:?}"))?;
        let entry = record.to_entry();
        let decoded = UserApps::decode(entry.value.as_slice())
            .context("💀 selftest: the bytes we just wrote are not a UserApps. Alarming.")?;

        ensure!(decoded == record.to_user_apps(), "💀 selftest: decoded message differs for key {}", entry.key);
        info!("✅ selftest {} -> {} bytes, apps={:?}", entry.key, entry.value.len(), decoded.apps);
    }
    Ok(())
}
