//! Sim Control
//!
//! Control plane between a client and a step-driven simulation engine: the
//! action protocol, handler dispatch, frame transport and demultiplexing.
//!
//! ## Architecture
//!
//! ```text
//! Controller  (controller.rs)          ← step / reset / stop, strict mode
//!   ├── Transport  (transport.rs, http.rs)   ← pipe or HTTP round trips
//!   ├── codec      (codec.rs)          ← framing, action + response payloads
//!   └── Event      (event.rs)          ← metadata + demultiplexed frames
//!         ├── frames  (frames.rs)
//!         └── ObjectListCache  (cache.rs)
//!
//! Engine  (engine.rs)                  ← session context, step → response
//!   ├── ActionRegistry  (dispatch.rs)  ← typed handler descriptors
//!   ├── handlers        (handlers.rs)
//!   │     ├── TeleportValidator  (teleport.rs)
//!   │     └── pose search        (poses.rs)
//!   ├── FastEmitCache   (cache.rs)
//!   ├── ObjectFilter    (filter.rs)
//!   └── Scene / render  (scene.rs, render.rs)
//!
//! host  (host.rs, server feature)      ← serves an Engine over FIFOs or HTTP
//! ```
//!
//! The engine is a deterministic box world used to exercise the client
//! contract end to end.

// Protocol types are always available.
pub mod protocol;
pub mod types;

pub mod cache;
pub mod codec;
pub mod controller;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod event;
pub mod filter;
pub mod frames;
pub mod handlers;
pub mod http;
pub mod poses;
pub mod render;
pub mod scene;
pub mod teleport;
pub mod transport;

// Engine host requires the `server` feature.
#[cfg(feature = "server")]
pub mod host;

pub use controller::{Controller, ControllerConfig, SessionState};
pub use engine::Engine;
pub use error::{ActionError, CodecError, ControllerError, TransportError};
pub use event::Event;
pub use frames::{DepthFrame, FrameSet, RgbFrame};
pub use http::HttpTransport;
pub use protocol::{ActionRequest, ErrorCode, InitializeOptions, Metadata};
pub use transport::{PipeTransport, Transport};
pub use types::{AgentMode, AgentState, EngineConfig, Pose, ThirdPartyCamera, Vec3};

#[cfg(feature = "server")]
pub use host::{serve_fifos, serve_http, serve_stream, HostState};
