//! Host functions registered into every sandboxed instance.
//!
//! Guest signatures, in the default `extism:host/user` namespace:
//!
//! ```text
//! kv_read(bucket: ptr, key: ptr) -> ptr
//! kv_write(bucket: ptr, key: ptr, value: ptr)
//! ```
//!
//! `bucket` is accepted so guests built against the bucketed signature
//! link unchanged; it is ignored because the store is one flat namespace.

use extism::{CurrentPlugin, Function, UserData, Val, PTR};
use tracing::warn;

use super::KvStore;

pub const KV_READ: &str = "kv_read";
pub const KV_WRITE: &str = "kv_write";

/// Capabilities handed to one sandboxed instance.
///
/// Built per invocation from explicit handles and passed into the
/// sandbox constructor; host functions see only what is in here.
#[derive(Clone)]
pub struct HostCapabilities {
    kv: KvStore,
}

impl HostCapabilities {
    pub fn new(kv: KvStore) -> Self {
        Self { kv }
    }

    pub fn kv(&self) -> &KvStore {
        &self.kv
    }

    /// Host functions to register, in registration order.
    pub fn functions(&self) -> Vec<Function> {
        vec![
            Function::new(
                KV_READ,
                [PTR, PTR],
                [PTR],
                UserData::new(self.kv.clone()),
                kv_read,
            ),
            Function::new(
                KV_WRITE,
                [PTR, PTR, PTR],
                [],
                UserData::new(self.kv.clone()),
                kv_write,
            ),
        ]
    }
}

fn store_handle(user_data: &UserData<KvStore>) -> Result<KvStore, extism::Error> {
    let data = user_data.get()?;
    let store = data
        .lock()
        .map_err(|_| extism::Error::msg("key/value handle poisoned"))?
        .clone();
    Ok(store)
}

fn kv_read(
    plugin: &mut CurrentPlugin,
    inputs: &[Val],
    outputs: &mut [Val],
    user_data: UserData<KvStore>,
) -> Result<(), extism::Error> {
    let key: String = plugin.memory_get_val(&inputs[1])?;
    let store = store_handle(&user_data)?;
    let value = store.read(&key).map_err(|e| {
        warn!("kv_read {key} failed: {e}");
        extism::Error::msg(e.to_string())
    })?;
    plugin.memory_set_val(&mut outputs[0], value)?;
    Ok(())
}

fn kv_write(
    plugin: &mut CurrentPlugin,
    inputs: &[Val],
    _outputs: &mut [Val],
    user_data: UserData<KvStore>,
) -> Result<(), extism::Error> {
    let key: String = plugin.memory_get_val(&inputs[1])?;
    let value: Vec<u8> = plugin.memory_get_val(&inputs[2])?;
    let store = store_handle(&user_data)?;
    store.write(&key, &value).map_err(|e| {
        warn!("kv_write {key} failed: {e}");
        extism::Error::msg(e.to_string())
    })?;
    Ok(())
}
