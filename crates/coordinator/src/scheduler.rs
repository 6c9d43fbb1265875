//! Per-host parallel-copy slot accounting with lazy, timeout-based
//! reclamation of abandoned tokens.
//!
//! A single mutex guards both the per-host free-slot counters and the
//! per-destination active-transfer map; every public operation takes the
//! lock, performs lazy expiry against the host or destination it touches,
//! and releases it. There is no dedicated timer thread — an abandoned
//! token is only reclaimed when some later call happens to touch the same
//! host or destination.

use std::collections::HashMap;
use std::sync::Mutex;

use core::location::now_secs;

struct HostSlots {
    max: u32,
    free: u32,
    tokens: Vec<u64>,
}

type ActiveKey = (String, String);

#[derive(Default)]
struct Inner {
    hosts: HashMap<String, HostSlots>,
    active: HashMap<ActiveKey, u64>,
}

pub struct TransferScheduler {
    inner: Mutex<Inner>,
    max_copy_server: u32,
    max_copy_node: u32,
    max_wait_copy: u64,
}

impl TransferScheduler {
    #[must_use]
    pub fn new(max_copy_server: u32, max_copy_node: u32, max_wait_copy: u64) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_copy_server,
            max_copy_node,
            max_wait_copy,
        }
    }

    /// Advisory read of the free-slot counter. No reservation is made.
    #[must_use]
    pub fn has_available_slots(&self, host: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        self.expire_host(&mut inner, host, now_secs());
        inner.hosts.get(host).is_none_or(|h| h.free > 0)
    }

    /// Free slots remaining for `host`, or its eventual max if it has
    /// never been touched. Used by tests to check slot conservation.
    #[must_use]
    pub fn free_slots(&self, host: &str, max: u32) -> u32 {
        let mut inner = self.inner.lock().unwrap();
        self.expire_host(&mut inner, host, now_secs());
        inner.hosts.get(host).map_or(max, |h| h.free)
    }

    /// True iff, after lazy expiry, some token is currently writing
    /// `dest_path` on `dest_node`.
    #[must_use]
    pub fn is_active_transfer(&self, dest_node: &str, dest_path: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        self.expire_active(&mut inner, dest_node, now_secs());
        inner.active.contains_key(&(dest_node.to_string(), dest_path.to_string()))
    }

    /// Attempt to reserve a slot on `file_server` (budget `MAX_COPY_SERVER`)
    /// for a transfer writing `dest_path` on `dest_node`. Returns a fresh
    /// nonzero token on success, `0` on refusal.
    pub fn start_copy_from_server(&self, file_server: &str, dest_node: &str, dest_path: &str) -> u64 {
        self.start_copy(file_server, self.max_copy_server, dest_node, dest_path)
    }

    /// Same as [`Self::start_copy_from_server`] but against the
    /// `MAX_COPY_NODE` budget of a peer compute node.
    pub fn start_copy_from_node(&self, src_host: &str, dest_node: &str, dest_path: &str) -> u64 {
        self.start_copy(src_host, self.max_copy_node, dest_node, dest_path)
    }

    fn start_copy(&self, source_host: &str, max: u32, dest_node: &str, dest_path: &str) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        let now = now_secs();
        self.expire_host(&mut inner, source_host, now);
        self.expire_active(&mut inner, dest_node, now);

        let key = (dest_node.to_string(), dest_path.to_string());
        if inner.active.contains_key(&key) {
            return 0;
        }
        let slots = inner
            .hosts
            .entry(source_host.to_string())
            .or_insert_with(|| HostSlots {
                max,
                free: max,
                tokens: Vec::new(),
            });
        if slots.free == 0 {
            return 0;
        }
        slots.free -= 1;
        // Collisions between tokens issued in the same second are fine:
        // the monotonicity law only requires t2 >= t1, not strict order.
        let token = now.max(1);
        slots.tokens.push(token);
        inner.active.insert(key, token);
        token
    }

    /// Release the slot held by `token` on `src_host` and clear any
    /// destination entry on `dest_node` pointing at it.
    pub fn end_copy(&self, src_host: &str, dest_node: &str, token: u64) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(slots) = inner.hosts.get_mut(src_host) {
            if let Some(pos) = slots.tokens.iter().position(|&t| t == token) {
                slots.tokens.remove(pos);
                slots.free += 1;
            }
        }
        inner.active.retain(|k, v| !(k.0 == dest_node && *v == token));
    }

    /// Mint a new token for a still-live, long-running copy, replacing
    /// `old_token` in both the host's outstanding list and the
    /// destination's active-transfer entry. Returns the new token.
    pub fn update_token(&self, src_host: &str, dest_node: &str, old_token: u64) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        let new_token = now_secs().max(old_token);
        if let Some(slots) = inner.hosts.get_mut(src_host) {
            if let Some(pos) = slots.tokens.iter().position(|&t| t == old_token) {
                slots.tokens[pos] = new_token;
            }
        }
        for (key, value) in &mut inner.active {
            if key.0 == dest_node && *value == old_token {
                *value = new_token;
            }
        }
        new_token
    }

    fn expire_host(&self, inner: &mut Inner, host: &str, now: u64) {
        let max_wait = self.max_wait_copy;
        let Some(slots) = inner.hosts.get_mut(host) else {
            return;
        };
        let mut expired = Vec::new();
        slots.tokens.retain(|&t| {
            if now.saturating_sub(t) > max_wait {
                expired.push(t);
                false
            } else {
                true
            }
        });
        if expired.is_empty() {
            return;
        }
        slots.free += expired.len() as u32;
        inner.active.retain(|_, v| !expired.contains(v));
    }

    fn expire_active(&self, inner: &mut Inner, dest_node: &str, now: u64) {
        let max_wait = self.max_wait_copy;
        let stale: Vec<(ActiveKey, u64)> = inner
            .active
            .iter()
            .filter(|(key, _)| key.0 == dest_node)
            .filter(|(_, &token)| now.saturating_sub(token) > max_wait)
            .map(|(key, &token)| (key.clone(), token))
            .collect();
        for (key, token) in stale {
            inner.active.remove(&key);
            for slots in inner.hosts.values_mut() {
                if let Some(pos) = slots.tokens.iter().position(|&t| t == token) {
                    slots.tokens.remove(pos);
                    slots.free += 1;
                    break;
                }
            }
        }
    }
}
