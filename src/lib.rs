//! tierform - provision a three-tier deployment and bootstrap its web service
//!
//! The library half of the `tierform` binary: desired-state configuration,
//! caller IP discovery, the provisioners that declare the resource set, the
//! provider clients and deployment outputs. Convergence itself lives in the
//! `declarative` crate and the on-host sequence in `hostboot`.
//!
//! ```
//! use std::net::Ipv4Addr;
//! use tierform::config::DeploymentConfig;
//! use tierform::provisioners::Deployment;
//!
//! let config = DeploymentConfig::from_toml(r#"
//! region = "eu-west-1"
//! [compute]
//! image_id = "ami-0abc1234"
//! key_name = "ops"
//! [database]
//! password = "db-pass"
//! [app]
//! secret_key = "k3y"
//! repo_url = "https://git.example.com/notes-api.git"
//! "#).unwrap();
//!
//! let graph = Deployment::new(&config, Ipv4Addr::new(203, 0, 113, 7)).graph().unwrap();
//! assert_eq!(graph.len(), 12);
//! ```

pub mod config;
pub mod discovery;
pub mod outputs;
pub mod paths;
pub mod provider;
pub mod provisioners;
