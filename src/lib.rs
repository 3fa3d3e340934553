pub mod archive;
pub mod comicinfo;
pub mod config;
pub mod domain;
pub mod error;
pub mod extract;
pub mod inspect;
pub mod metadata;
pub mod naming;
pub mod output;
pub mod pack;
pub mod pipeline;
pub mod progress;
