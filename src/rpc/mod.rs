//! Host command channel.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  link write callback                                         │
//! │        │ raw bytes                                           │
//! │        ▼                                                     │
//! │  ┌───────────┐   ┌──────────────┐   ┌─────────────────────┐  │
//! │  │   codec   │──▶│  channels    │──▶│  engine (worker)    │  │
//! │  │ (framing) │   │ (FIFO of 20) │   │  sensor · labels ·  │  │
//! │  └───────────┘   └──────────────┘   │  config · ota       │  │
//! │                         │           └─────────┬───────────┘  │
//! │                         │ REGISTER_CANCEL     │ replies      │
//! │                         ▼ (inline)            ▼              │
//! │                    cancel flag          link notify          │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod channels;
pub mod codec;
pub mod crc32;
pub mod engine;
pub mod ota;
