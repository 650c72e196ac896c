/*!
 * Command dispatcher.
 *
 * A case-insensitive table from command name to handler. Every handler
 * validates its own arity and returns already-encoded reply bytes; the
 * dispatcher increments a process-wide `command_count` per invocation and
 * forwards successful mutating commands to the persistence layer, which
 * filters non-mutating ones itself (spec §4.7).
 */

use std::sync::atomic::{AtomicU64, Ordering};

use crate::persistence::PersistenceManager;
use crate::protocol::{resp_array, resp_bulk, resp_error, resp_integer, resp_ok, resp_pong, resp_simple};
use crate::storage::DataStore;

/// Dispatcher-level behavior toggles, separate from `PersistenceConfig`
/// since they shape reply encoding rather than durability.
#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    /// Render TTL/PTTL's -1/-2 cases as human sentences rather than plain
    /// integers, matching the source idiosyncrasy (spec §9).
    pub humanize_expiry_replies: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            humanize_expiry_replies: true,
        }
    }
}

pub struct Dispatcher {
    config: DispatcherConfig,
    command_count: AtomicU64,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        Self {
            config,
            command_count: AtomicU64::new(0),
        }
    }

    pub fn command_count(&self) -> u64 {
        self.command_count.load(Ordering::Relaxed)
    }

    /// Execute one request against `store`, logging the command to
    /// `persistence` when the handler both succeeds and mutates state.
    pub fn dispatch(&self, store: &mut DataStore, persistence: &PersistenceManager, command: &str, args: &[String]) -> Vec<u8> {
        self.command_count.fetch_add(1, Ordering::Relaxed);
        let upper = command.to_ascii_uppercase();

        let outcome = match upper.as_str() {
            "PING" => Outcome::reply(resp_pong()),
            "ECHO" => Outcome::reply(resp_simple(&args.join(" "))),
            "SET" => self.cmd_set(store, args),
            "GET" => self.cmd_get(store, args),
            "DEL" => self.cmd_del(store, args),
            "EXISTS" => self.cmd_exists(store, args),
            "KEYS" => self.cmd_keys(store, args),
            "FLUSHALL" => self.cmd_flushall(store, args),
            "EXPIRE" => self.cmd_expire(store, args),
            "EXPIREAT" => self.cmd_expireat(store, args),
            "TTL" => self.cmd_ttl(store, args),
            "PTTL" => self.cmd_pttl(store, args),
            "PERSIST" => self.cmd_persist(store, args),
            "TYPE" => self.cmd_type(store, args),
            "INFO" => Outcome::reply(self.cmd_info(store, persistence)),
            "BGREWRITEAOF" => self.cmd_bgrewriteaof(store, persistence),
            "CONFIG" => self.cmd_config(persistence, args),
            _ => Outcome::reply(resp_error(&format!("unknown command '{command}'"))),
        };

        if outcome.mutated {
            persistence.log_write_command(&upper, args);
        }
        outcome.reply
    }

    fn cmd_set(&self, store: &mut DataStore, args: &[String]) -> Outcome {
        if args.len() < 2 {
            return arity_error("set");
        }
        let value = args[1..].join(" ");
        store.set(args[0].as_bytes(), value.into_bytes(), None);
        Outcome::mutating(resp_ok())
    }

    fn cmd_get(&self, store: &mut DataStore, args: &[String]) -> Outcome {
        if args.len() != 1 {
            return arity_error("get");
        }
        Outcome::reply(resp_bulk(store.get(args[0].as_bytes()).as_deref()))
    }

    fn cmd_del(&self, store: &mut DataStore, args: &[String]) -> Outcome {
        if args.is_empty() {
            return arity_error("del");
        }
        let keys: Vec<&[u8]> = args.iter().map(|a| a.as_bytes()).collect();
        let removed = store.delete(&keys);
        Outcome::mutating(resp_integer(removed))
    }

    fn cmd_exists(&self, store: &mut DataStore, args: &[String]) -> Outcome {
        if args.is_empty() {
            return arity_error("exists");
        }
        let keys: Vec<&[u8]> = args.iter().map(|a| a.as_bytes()).collect();
        Outcome::reply(resp_integer(store.exists(&keys)))
    }

    fn cmd_keys(&self, store: &mut DataStore, args: &[String]) -> Outcome {
        if !args.is_empty() {
            return arity_error("keys");
        }
        let keys = store.keys("*");
        let items = keys.iter().map(|k| resp_bulk(Some(k))).collect::<Vec<_>>();
        Outcome::reply(resp_array(&items))
    }

    fn cmd_flushall(&self, store: &mut DataStore, args: &[String]) -> Outcome {
        if !args.is_empty() {
            return arity_error("flushall");
        }
        store.flush();
        Outcome::mutating(resp_ok())
    }

    fn cmd_expire(&self, store: &mut DataStore, args: &[String]) -> Outcome {
        if args.len() != 2 {
            return arity_error("expire");
        }
        let Ok(seconds) = args[1].parse::<i64>() else {
            return Outcome::reply(resp_error("invalid expire time"));
        };
        if seconds <= 0 {
            return Outcome::reply(resp_integer(0));
        }
        let ok = store.expire(args[0].as_bytes(), seconds);
        Outcome::mutating_if(ok, resp_integer(ok as i64))
    }

    fn cmd_expireat(&self, store: &mut DataStore, args: &[String]) -> Outcome {
        if args.len() != 2 {
            return arity_error("expireat");
        }
        let Ok(ts) = args[1].parse::<i64>() else {
            return Outcome::reply(resp_error("invalid expire time"));
        };
        let now = current_unix_secs();
        if ts <= now {
            return Outcome::reply(resp_integer(0));
        }
        let ok = store.expire_at(args[0].as_bytes(), ts);
        Outcome::mutating_if(ok, resp_integer(ok as i64))
    }

    fn cmd_ttl(&self, store: &mut DataStore, args: &[String]) -> Outcome {
        if args.len() != 1 {
            return arity_error("ttl");
        }
        let ttl = store.ttl(args[0].as_bytes());
        Outcome::reply(self.humanize_expiry(&args[0], ttl))
    }

    fn cmd_pttl(&self, store: &mut DataStore, args: &[String]) -> Outcome {
        if args.len() != 1 {
            return arity_error("pttl");
        }
        let pttl = store.pttl(args[0].as_bytes());
        Outcome::reply(self.humanize_expiry(&args[0], pttl))
    }

    fn humanize_expiry(&self, key: &str, value: i64) -> Vec<u8> {
        if !self.config.humanize_expiry_replies {
            return resp_integer(value);
        }
        match value {
            -1 => resp_simple(&format!("No expiration set for key: {key}")),
            -2 => resp_simple(&format!("Key has expired: {key}")),
            n => resp_integer(n),
        }
    }

    fn cmd_persist(&self, store: &mut DataStore, args: &[String]) -> Outcome {
        if args.len() != 1 {
            return arity_error("persist");
        }
        let ok = store.persist(args[0].as_bytes());
        Outcome::mutating_if(ok, resp_integer(ok as i64))
    }

    fn cmd_type(&self, store: &mut DataStore, args: &[String]) -> Outcome {
        if args.len() != 1 {
            return arity_error("type");
        }
        Outcome::reply(resp_simple(store.get_type(args[0].as_bytes())))
    }

    fn cmd_info(&self, store: &mut DataStore, persistence: &PersistenceManager) -> Vec<u8> {
        let stats = persistence.get_stats();
        let report = format!(
            "keys:{}\r\nmemory_usage:{}\r\ncommand_count:{}\r\naof_enabled:{}\r\naof_filename:{}\r\npending_writes:{}\r\n",
            store.len(),
            store.get_memory_usage(),
            self.command_count(),
            stats.aof_enabled,
            stats.aof_filename,
            stats.pending_writes,
        );
        resp_bulk(Some(report.as_bytes()))
    }

    fn cmd_bgrewriteaof(&self, store: &mut DataStore, persistence: &PersistenceManager) -> Outcome {
        persistence.request_rewrite(store);
        Outcome::reply(resp_simple("Background append only file rewriting started"))
    }

    /// `CONFIG GET <key>`, the only subcommand the source ever filled in
    /// beyond a stub; `CONFIG SET` is left unimplemented (spec §9/SPEC_FULL
    /// §4.7).
    fn cmd_config(&self, persistence: &PersistenceManager, args: &[String]) -> Outcome {
        if args.len() != 2 || !args[0].eq_ignore_ascii_case("get") {
            return Outcome::reply(resp_error("unknown CONFIG subcommand"));
        }
        let cfg = persistence.config();
        let value = match args[1].as_str() {
            "aof_enabled" => Some(cfg.aof_enabled.to_string()),
            "aof_filename" => Some(cfg.aof_filename.clone()),
            "aof_sync_policy" => Some(sync_policy_name(cfg.aof_sync_policy).to_string()),
            "aof_rewrite_percentage" => Some(cfg.aof_rewrite_percentage.to_string()),
            "aof_rewrite_min_size" => Some(cfg.aof_rewrite_min_size.to_string()),
            "rdb_filename" => Some(cfg.rdb_filename.clone()),
            "max_memory_usage" => Some(cfg.max_memory_usage.to_string()),
            _ => None,
        };
        Outcome::reply(resp_bulk(value.as_deref().map(str::as_bytes)))
    }
}

fn sync_policy_name(policy: crate::config::SyncPolicy) -> &'static str {
    use crate::config::SyncPolicy::*;
    match policy {
        Always => "always",
        EverySec => "everysec",
        No => "no",
    }
}

fn current_unix_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn arity_error(cmd: &str) -> Outcome {
    Outcome::reply(resp_error(&format!("wrong number of arguments for '{cmd}' command")))
}

struct Outcome {
    reply: Vec<u8>,
    mutated: bool,
}

impl Outcome {
    fn reply(reply: Vec<u8>) -> Self {
        Self { reply, mutated: false }
    }

    fn mutating(reply: Vec<u8>) -> Self {
        Self { reply, mutated: true }
    }

    fn mutating_if(mutated: bool, reply: Vec<u8>) -> Self {
        Self { reply, mutated }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::config_in;
    use tempfile::tempdir;

    fn harness() -> (Dispatcher, DataStore, PersistenceManager) {
        let dir = tempdir().unwrap();
        let cfg = config_in(dir.path());
        let persistence = PersistenceManager::new(cfg);
        persistence.start().unwrap();
        // Leak the tempdir's lifetime into the test by forgetting the
        // handle — persistence holds only the path, not a descriptor tied
        // to `dir`, so this is safe for the scope of a single test.
        std::mem::forget(dir);
        (Dispatcher::new(DispatcherConfig::default()), DataStore::new(), persistence)
    }

    fn args(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn ping_and_echo() {
        let (d, mut s, p) = harness();
        assert_eq!(d.dispatch(&mut s, &p, "PING", &[]), b"+PONG\r\n");
        assert_eq!(d.dispatch(&mut s, &p, "ECHO", &args(&["hi", "there"])), b"+hi there\r\n");
    }

    #[test]
    fn set_then_get_roundtrips() {
        let (d, mut s, p) = harness();
        assert_eq!(d.dispatch(&mut s, &p, "SET", &args(&["k", "v"])), b"+OK\r\n");
        assert_eq!(d.dispatch(&mut s, &p, "GET", &args(&["k"])), b"$1\r\nv\r\n");
    }

    #[test]
    fn get_missing_is_null_bulk() {
        let (d, mut s, p) = harness();
        assert_eq!(d.dispatch(&mut s, &p, "GET", &args(&["nope"])), b"$-1\r\n");
    }

    #[test]
    fn arity_mismatch_reports_command_name() {
        let (d, mut s, p) = harness();
        assert_eq!(
            d.dispatch(&mut s, &p, "GET", &[]),
            b"-ERR wrong number of arguments for 'get' command\r\n"
        );
    }

    #[test]
    fn unknown_command_errors() {
        let (d, mut s, p) = harness();
        assert_eq!(d.dispatch(&mut s, &p, "FROB", &[]), b"-ERR unknown command 'FROB'\r\n");
    }

    #[test]
    fn unknown_command_preserves_original_case() {
        let (d, mut s, p) = harness();
        assert_eq!(d.dispatch(&mut s, &p, "BOGUS", &[]), b"-ERR unknown command 'BOGUS'\r\n");
    }

    #[test]
    fn expire_with_nonpositive_seconds_returns_zero_without_mutating() {
        let (d, mut s, p) = harness();
        d.dispatch(&mut s, &p, "SET", &args(&["k", "v"]));
        assert_eq!(d.dispatch(&mut s, &p, "EXPIRE", &args(&["k", "0"])), b":0\r\n");
        assert_eq!(
            d.dispatch(&mut s, &p, "TTL", &args(&["k"])),
            b"+No expiration set for key: k\r\n"
        );
    }

    #[test]
    fn expire_then_wait_reports_key_has_expired_with_key_name() {
        let (d, mut s, p) = harness();
        d.dispatch(&mut s, &p, "SET", &args(&["foo", "v"]));
        d.dispatch(&mut s, &p, "EXPIRE", &args(&["foo", "1"]));
        s.expire_at(b"foo", 1);
        assert_eq!(
            d.dispatch(&mut s, &p, "TTL", &args(&["foo"])),
            b"+Key has expired: foo\r\n"
        );
    }

    #[test]
    fn ttl_humanizes_by_default_and_can_be_disabled() {
        let dir = tempdir().unwrap();
        let cfg = config_in(dir.path());
        let persistence = PersistenceManager::new(cfg);
        persistence.start().unwrap();
        std::mem::forget(dir);
        let mut store = DataStore::new();

        let humanized = Dispatcher::new(DispatcherConfig {
            humanize_expiry_replies: true,
        });
        assert_eq!(
            humanized.dispatch(&mut store, &persistence, "TTL", &args(&["missing"])),
            b"+Key has expired: missing\r\n"
        );

        let plain = Dispatcher::new(DispatcherConfig {
            humanize_expiry_replies: false,
        });
        assert_eq!(
            plain.dispatch(&mut store, &persistence, "TTL", &args(&["missing"])),
            b":-2\r\n"
        );
    }

    #[test]
    fn bgrewriteaof_replies_and_config_get_reads_known_key() {
        let (d, mut s, p) = harness();
        let reply = d.dispatch(&mut s, &p, "BGREWRITEAOF", &[]);
        assert_eq!(reply, b"+Background append only file rewriting started\r\n");

        let reply = d.dispatch(&mut s, &p, "CONFIG", &args(&["GET", "aof_sync_policy"]));
        assert_eq!(reply, b"$9\r\neverysec\r\n");

        let reply = d.dispatch(&mut s, &p, "CONFIG", &args(&["GET", "nope"]));
        assert_eq!(reply, b"$-1\r\n");
    }

    #[test]
    fn command_count_increments_per_dispatch() {
        let (d, mut s, p) = harness();
        d.dispatch(&mut s, &p, "PING", &[]);
        d.dispatch(&mut s, &p, "PING", &[]);
        assert_eq!(d.command_count(), 2);
    }
}
