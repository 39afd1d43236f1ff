//! # Cybrelink Dedicated Server
//!
//! Authoritative, headless multiplayer server for the Cybrelink simulation.
//! Thin client terminals connect over TCP; this process owns all world state
//! (computers, missions, bank accounts, access logs, NPC agents, the in-game
//! clock), validates every client action, and streams incremental state back
//! as delta-encoded updates. Persistence lives in an external Supabase
//! backend reached over REST; the in-memory world stays canonical when the
//! backend is slow, wrong, or absent.
//!
//! ## Architecture
//!
//! One listener task accepts connections, one task per connection pumps the
//! socket, and a single tick task owns every piece of mutable state. The tick
//! task runs two cadences: a 60 Hz game tick (in-game clock, NPC scheduler,
//! trace/download countdowns, 30-second persistence flush) and a 20 Hz
//! network tick (time sync, world deltas, player list broadcast, timeout
//! sweep). Blocking persistence HTTP runs on a dedicated worker thread fed
//! through a channel, so the tick loop never waits on the network.
//!
//! ## Module map
//!
//! - [`config`] — runtime tunables from the command line
//! - [`net`] — listener and per-connection socket tasks
//! - [`session`] — per-client FSM (unauth → auth → dead) and registry
//! - [`world`] — the authoritative store with dirty and change tracking
//! - [`actions`] — the server-side dispatcher for client actions
//! - [`npc`] — non-player agents driven at tick rate
//! - [`clock`] — the six-field in-game calendar (30-day months)
//! - [`server`] — the dual-rate tick loop tying it all together
//! - [`persist`] — Supabase REST adapter and background write-back worker

pub mod actions;
pub mod clock;
pub mod config;
pub mod net;
pub mod npc;
pub mod persist;
pub mod server;
pub mod session;
pub mod world;
