//! Mountpoint registry: `/mount → input source`.
//!
//! The server component routes an inbound connection by mountpoint;
//! [`harbor`] hands back the existing source for that mount or creates and
//! registers a fresh one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use crate::input::{HarborInput, HarborInputOptions};

fn mounts() -> &'static Mutex<HashMap<String, Arc<HarborInput>>> {
    static MOUNTS: OnceLock<Mutex<HashMap<String, Arc<HarborInput>>>> = OnceLock::new();
    MOUNTS.get_or_init(|| Mutex::new(HashMap::new()))
}

fn normalize(mount: &str) -> String {
    mount.trim_start_matches('/').to_string()
}

/// The input source at `options.mount`, creating and registering one if the
/// mount is new. Options are ignored for an existing mount.
pub fn harbor(options: HarborInputOptions) -> Arc<HarborInput> {
    let key = normalize(&options.mount);
    let mut map = mounts().lock().expect("mount registry poisoned");
    if let Some(existing) = map.get(&key) {
        return Arc::clone(existing);
    }
    let input = HarborInput::new(options);
    input.wake_up();
    map.insert(key, Arc::clone(&input));
    input
}

pub fn find(mount: &str) -> Option<Arc<HarborInput>> {
    let map = mounts().lock().expect("mount registry poisoned");
    map.get(&normalize(mount)).cloned()
}

/// Remove a mount, disconnecting its client and dropping its telemetry.
pub fn remove(mount: &str) -> Option<Arc<HarborInput>> {
    let input = {
        let mut map = mounts().lock().expect("mount registry poisoned");
        map.remove(&normalize(mount))
    }?;
    input.retire();
    Some(input)
}

#[cfg(test)]
mod tests {
    use super::{find, harbor, remove};
    use crate::input::HarborInputOptions;

    #[test]
    fn same_mount_returns_the_same_source() {
        let first = harbor(HarborInputOptions::new("/mounts-a"));
        let second = harbor(HarborInputOptions::new("mounts-a"));
        assert!(std::sync::Arc::ptr_eq(&first, &second));
        assert_eq!(first.mount(), "mounts-a");
    }

    #[test]
    fn removed_mounts_are_recreated_fresh() {
        let first = harbor(HarborInputOptions::new("mounts-b"));
        assert!(find("/mounts-b").is_some());
        remove("mounts-b");
        assert!(find("mounts-b").is_none());
        let second = harbor(HarborInputOptions::new("mounts-b"));
        assert!(!std::sync::Arc::ptr_eq(&first, &second));
    }
}
