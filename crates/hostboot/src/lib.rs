//! # Hostboot
//!
//! First-boot initialization of a web service host.
//!
//! The provisioning side renders a [`Payload`] from typed
//! [`BootstrapParameters`] with [`BootstrapInjector`]; the instance receives it
//! at creation, persists the parameters and runs the
//! [`ServiceBootstrapMachine`], which installs the runtime, fetches the
//! application, writes its configuration, migrates, collects static assets,
//! seeds data and registers a supervised service.
//!
//! All host side effects go through the [`Host`] trait, so the machine can be
//! exercised against a [`ScriptedHost`]:
//!
//! ```
//! use hostboot::{
//!     AppProfile, BootOutcome, BootState, BootstrapParameters, LogObserver, ScriptedHost,
//!     ServiceBootstrapMachine,
//! };
//!
//! let params = BootstrapParameters {
//!     db_host: "db.internal".into(),
//!     db_port: 5432,
//!     db_name: "notes".into(),
//!     db_user: "admin".into(),
//!     db_password: "secret".into(),
//!     debug: false,
//!     secret_key: "key".into(),
//!     static_root: "/var/www/static".into(),
//!     service_port: 8000,
//!     app: AppProfile {
//!         repo_url: "https://git.example.com/notes-api.git".into(),
//!         ..AppProfile::default()
//!     },
//! };
//!
//! let host = ScriptedHost::new();
//! let outcome = ServiceBootstrapMachine::new(&host, &params)
//!     .run(&mut LogObserver)
//!     .unwrap();
//! assert!(matches!(outcome, BootOutcome::Completed(j) if j.state == BootState::ServiceRunning));
//! ```

pub mod env_file;
pub mod error;
pub mod host;
pub mod machine;
pub mod params;
pub mod payload;
pub mod unit;

pub use env_file::{ENV_KEYS, env_entries, render_env_file};
pub use error::{Error, ErrorCategory, Result};
pub use host::{CommandOutput, Host, HostCommand, ScriptedHost, SystemHost};
pub use machine::{
    BootJournal, BootOutcome, BootPaths, BootState, FailurePolicy, LogObserver,
    ServiceBootstrapMachine, STEPS, Step, StepObserver, StepRecord, StepStatus,
};
pub use params::{AppProfile, BootstrapParameters, MIN_SERVICE_PORT};
pub use payload::{BootstrapInjector, Payload, render_template};
pub use unit::{LogSink, RestartPolicy, ServiceUnit, UNIT_DIR};
