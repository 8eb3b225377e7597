//! Client-side certificate and capability issuance for the keel
//! distributed-filesystem control plane.
//!
//! Users, volumes, and gateways are represented on a central metadata
//! service, but every mutation to them is authored, versioned, and signed
//! *locally* before transmission, so the service and peer gateways never
//! have to be unconditionally trusted: any recipient can validate the
//! authenticity and freshness of a certificate offline.
//!
//! # Pipeline
//!
//! A caller builds an [`engine::Operation`] — entity kind, verb, typed
//! field values — and hands it to the [`engine::Engine`]. The engine loads
//! the existing certificate through the local identity [`index`], validates
//! fields with the [`capability`] resolver and the [`crypto`] key manager,
//! produces a new monotonically versioned certificate signed per the
//! signing-authority policy, and, when membership or capabilities changed,
//! asks the [`bundle`] builder for an updated trust bundle. The result is a
//! ready-to-submit argument set; local state is persisted only after the
//! remote call succeeds.
//!
//! # Two-phase commit
//!
//! Compute-and-sign is pure; persist-locally is gated on remote
//! acknowledgment. A crash or a rejected submission leaves local
//! certificates, keys, and id records exactly as they were.
//!
//! # Example
//!
//! ```no_run
//! use keel_core::config::ClientConfig;
//! use keel_core::engine::{Engine, Operation, VolumeRequest, VolumeVerb};
//! use keel_core::keystore::FsKeyStore;
//!
//! # fn demo(transport: &dyn keel_core::transport::Transport) -> Result<(), keel_core::error::Error> {
//! let config = ClientConfig::new("/var/lib/keel", "owner@example.com");
//! let keys = FsKeyStore::new("/var/lib/keel/keys");
//! let engine = Engine::new(&config, &keys);
//!
//! let op = Operation::Volume {
//!     verb: VolumeVerb::Create,
//!     request: VolumeRequest {
//!         name: Some("data".into()),
//!         owner_email: Some("owner@example.com".into()),
//!         blocksize: Some(61440),
//!         ..VolumeRequest::default()
//!     },
//! };
//! engine.execute(&op, transport)?;
//! # Ok(())
//! # }
//! ```

pub mod bundle;
pub mod canonical;
pub mod capability;
pub mod cert;
pub mod config;
pub mod crypto;
pub mod driver;
pub mod engine;
pub mod error;
pub mod index;
pub mod keystore;
pub mod sealing;
pub mod transport;

pub use bundle::{build_trust_bundle, BundleOverride, TrustBundle, TrustBundleBlock};
pub use cert::{GatewayCertificate, UserCertificate, VolumeCertificate, VolumeRoot};
pub use config::{ClientConfig, ObjectKind};
pub use engine::{Engine, Operation, Prepared};
pub use error::Error;
pub use keystore::{FsKeyStore, KeyStore};
pub use transport::{ResultMap, Transport};
