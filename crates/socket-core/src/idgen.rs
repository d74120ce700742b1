//! Snowflake-style connection identifiers.
//!
//! Layout (63 usable bits, always positive as an `i64`): a millisecond
//! timestamp, a fixed worker tag, and a per-millisecond sequence. Matches
//! `snowflake/snowflake.go` in layout and monotonicity, not bit-for-bit
//! encoding (the Go source XORs in a machine id sourced from the local
//! network interface; we take the worker tag as a constructor argument
//! instead of sniffing one).

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

const WORKER_BITS: u64 = 10;
const SEQ_BITS: u64 = 12;
const WORKER_SHIFT: u64 = SEQ_BITS;
const TIME_SHIFT: u64 = SEQ_BITS + WORKER_BITS;
const SEQ_MASK: u64 = (1 << SEQ_BITS) - 1;
const WORKER_MASK: u64 = (1 << WORKER_BITS) - 1;

struct State {
    last_millis: u64,
    seq: u64,
}

/// A monotonic, non-zero 63-bit id generator, one per worker.
pub struct IdGen {
    worker_tag: u64,
    state: Mutex<State>,
}

impl IdGen {
    pub fn new(worker_tag: i64) -> Self {
        Self {
            worker_tag: (worker_tag as u64) & WORKER_MASK,
            state: Mutex::new(State {
                last_millis: 0,
                seq: 0,
            }),
        }
    }

    /// Returns the next id. Always positive, always greater than the id
    /// returned by the previous call from the same generator.
    pub fn next(&self) -> i64 {
        let mut guard = self.state.lock().unwrap();
        let mut now = current_millis();
        if now < guard.last_millis {
            // clock moved backwards: keep handing out ids from the last tick
            now = guard.last_millis;
        }
        if now == guard.last_millis {
            guard.seq = (guard.seq + 1) & SEQ_MASK;
            if guard.seq == 0 {
                // sequence exhausted within this millisecond, spin to the next one
                while now <= guard.last_millis {
                    now = current_millis();
                }
            }
        } else {
            guard.seq = 0;
        }
        guard.last_millis = now;
        let id = (now << TIME_SHIFT) | (self.worker_tag << WORKER_SHIFT) | guard.seq;
        (id & 0x7fff_ffff_ffff_ffff) as i64
    }
}

fn current_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as u64
}
