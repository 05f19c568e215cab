//! # lathist - Persistent eBPF Latency Histograms
//!
//! lathist measures how long a kernel function (or the span between two
//! kernel functions) takes and keeps a logarithmic histogram of the results
//! per CPU. A trace is persisted under a name on bpffs, so it keeps counting
//! after the `lathist` process that created it has exited.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     eBPF Programs (Kernel)                      │
//! │  • fentry lat_start: PENDING_STARTS[pid_tgid] = ktime           │
//! │  • fexit  lat_end:   elapsed → encode → SLOTS[cpu][slot] += ... │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ pinned maps + links
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │              bpffs: /sys/fs/bpf/lathist/<name>/                 │
//! │        kslots · frac_bits · link_start · link_end               │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    lathist (This Crate)                         │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │  Lifecycle   │──▶│   Backend    │   │    Report    │         │
//! │  │  (manager)   │   │ (aya, bpffs) │──▶│ (aggregate)  │         │
//! │  └──────────────┘   └──────────────┘   └──────────────┘         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`histogram`]: userspace model of the measurement path
//!   - encoder shared with the kernel through `lathist_common`
//!   - `pending`: in-flight start timestamps
//!   - `accumulator`: per-core slot arrays with atomic updates
//!
//! - [`lifecycle`]: create / remove / list / read of named traces over two
//!   injected collaborators, `HookRegistrar` and `Persistence`
//!
//! - [`backend`]: collaborator implementations
//!   - `ebpf_setup` + `bpffs`: aya loading and bpffs pinning
//!   - `sim`: in-process kernel and store used by the tests
//!
//! - [`report`]: per-CPU and merged rows, text and JSON rendering
//!
//! - [`cli`]: command-line argument parsing
//!
//! - [`preflight`]: privilege, kernel version and bpffs checks
//!
//! - [`domain`]: core domain types (`FracBits`, `TraceName`, `CpuId`) and errors
//!
//! ## Slot Encoding
//!
//! With `p` fractional bits a value `v` lands in
//!
//! ```text
//! bucket = bitlen(v >> p)
//! slot   = v                                              if bucket == 0
//!        = (bucket << p) | ((v >> (bucket - 1)) & mask)   otherwise
//! ```
//!
//! giving `((65 - p) << p) + 1` slots: 66, 129, 253 or 497. Sums in buckets
//! above 20 are stored right-shifted so they do not overflow.
//!
//! ## Typical Usage
//!
//! ```bash
//! sudo lathist trace msleep
//! sudo lathist read msleep
//! sudo lathist remove msleep
//! ```

pub mod backend;
pub mod cli;
pub mod domain;
pub mod histogram;
pub mod lifecycle;
pub mod preflight;
pub mod report;
