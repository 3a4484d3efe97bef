//! `shipgate-client`: HTTP implementation of the `shipgate-core`
//! collaborator traits.
//!
//! # Endpoint mapping
//!
//! ```text
//! list_stories            GET  /stories
//! impact                  GET  /impact/{story}
//! deployment_plan         GET  /testing/{story}/deployment
//! migration_plan          GET  /testing/{story}/migrations
//! add_story               POST /stories/add                        {story_number, …}
//! test_results            GET  /testing/{story}/results
//! submit                  POST /testing/{story}/start-deployment   → {run_id}
//! action_status           GET  /testing/{story}/deployment-status?run_id=…
//! run_test_item           POST /testing/{story}/run                {test_name}
//! validate_migration_risk POST /testing/{story}/validate-migration {risk_id}
//! health                  GET  /health
//! ```
//!
//! # Quick start
//!
//! ```rust,ignore
//! use shipgate_client::{ClientConfig, HttpStoryService};
//! use shipgate_core::service::StoryService;
//!
//! let service = HttpStoryService::new(&ClientConfig::new("http://localhost:8000"))?;
//! for story in service.list_stories().await? {
//!     println!("{}", story.story_number);
//! }
//! ```

pub mod client;
pub mod error;
pub mod types;


pub use client::{ClientConfig, HttpStoryService};
pub use error::ClientError;
