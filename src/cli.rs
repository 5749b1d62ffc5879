//! CLI argument parsing for bucketsync

use crate::config::Config;
use crate::error::Result;
use crate::merge::MergeOptions;
use crate::put::PutOptions;
use crate::sync::SyncOptions;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// bucketsync - directory sync and object assembly for S3-compatible storage
#[derive(Parser, Debug)]
#[command(name = "bucketsync")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Output logs as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Configuration file path
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// S3 endpoint URL (overrides the config file)
    #[arg(long, global = true)]
    pub endpoint: Option<String>,

    /// Region (overrides the config file)
    #[arg(long, global = true)]
    pub region: Option<String>,

    /// Use path-style bucket addressing
    #[arg(long, global = true)]
    pub path_style: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Mirror a local directory or remote prefix onto another location
    Sync(SyncArgs),

    /// List objects and sub-prefixes under s3:// prefixes
    Ls(LsArgs),

    /// Upload local files, in parts when they are large
    Put(PutArgs),

    /// Assemble one object from every object under the source prefixes
    Merge(MergeArgs),

    /// Inspect or clean up unfinished multipart uploads
    Multipart(MultipartArgs),

    /// Show object count and total size under remote prefixes
    Du(DuArgs),

    /// Show configuration
    Config(ConfigArgs),
}

impl Cli {
    /// Load the config file and apply global overrides
    pub fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load_from(path)?,
            None => Config::load()?,
        };

        if let Some(endpoint) = &self.endpoint {
            config.endpoint = Some(endpoint.clone());
        }
        if let Some(region) = &self.region {
            config.region = Some(region.clone());
        }
        if self.path_style {
            config.force_path_style = true;
        }

        Ok(config)
    }
}

/// Arguments for the sync command
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Source path or s3:// URI
    pub source: String,

    /// Destination path or s3:// URI
    pub destination: String,

    /// Perform a trial run with no changes made
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Show progress bars
    #[arg(short = 'P', long)]
    pub progress: bool,

    /// Number of parallel transfers [default: auto]
    #[arg(short = 'j', long)]
    pub jobs: Option<usize>,

    /// Delete destination files missing from the source
    #[arg(long)]
    pub delete: bool,

    /// Compare MD5 digests of same-sized files
    #[arg(long)]
    pub check_content: bool,

    /// Content type for uploaded files
    #[arg(long)]
    pub content_type: Option<String>,

    /// Canned ACL for created objects
    #[arg(long)]
    pub acl: Option<String>,
}

impl SyncArgs {
    /// CLI args override config file values
    pub fn to_options(&self, config: &Config) -> SyncOptions {
        let mut options = SyncOptions::from_config(config);
        options.dry_run = self.dry_run;
        options.delete = self.delete;
        options.verify_content = self.check_content;
        options.progress = self.progress || config.progress;
        if let Some(jobs) = self.jobs.filter(|j| *j > 0) {
            options.parallelism = jobs;
        }
        if let Some(content_type) = &self.content_type {
            options.content_type = content_type.clone();
        }
        if self.acl.is_some() {
            options.acl = self.acl.clone();
        }
        options
    }
}

/// Arguments for the ls command
#[derive(Args, Debug)]
pub struct LsArgs {
    /// s3:// prefixes to list
    #[arg(required = true)]
    pub targets: Vec<String>,

    /// List every key below the prefix instead of one level
    #[arg(short, long)]
    pub recursive: bool,

    /// Show ETags and modification age
    #[arg(short, long)]
    pub long: bool,
}

/// Arguments for the put command
#[derive(Args, Debug)]
pub struct PutArgs {
    /// Destination s3:// key (a prefix when several files are given)
    pub destination: String,

    /// Local files to upload
    #[arg(required = true)]
    pub sources: Vec<PathBuf>,

    /// Files larger than this are uploaded in parts of this size
    #[arg(long)]
    pub part_size: Option<String>,

    /// Content type of the uploaded objects
    #[arg(long)]
    pub content_type: Option<String>,

    /// Canned ACL of the uploaded objects
    #[arg(long)]
    pub acl: Option<String>,

    /// Abort the multipart session when a part fails
    #[arg(long)]
    pub abort_on_error: bool,
}

impl PutArgs {
    pub fn to_options(&self, config: &Config) -> Result<PutOptions> {
        let mut options = PutOptions::from_config(config);
        if let Some(size) = &self.part_size {
            options.part_size = Config::parse_size(size)?;
        }
        options.abort_on_error = self.abort_on_error || config.abort_on_error;
        if let Some(content_type) = &self.content_type {
            options.content_type = content_type.clone();
        }
        if self.acl.is_some() {
            options.acl = self.acl.clone();
        }
        Ok(options)
    }
}

/// Arguments for the merge command
#[derive(Args, Debug)]
pub struct MergeArgs {
    /// Destination s3:// object
    pub destination: String,

    /// Source s3:// prefixes, merged in key order
    #[arg(required = true)]
    pub sources: Vec<String>,

    /// Show the plan without writing anything
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Sources above this size are part-copied (e.g. 5M, 64M)
    #[arg(long)]
    pub part_threshold: Option<String>,

    /// Content type of the merged object
    #[arg(long)]
    pub content_type: Option<String>,

    /// Canned ACL of the merged object
    #[arg(long)]
    pub acl: Option<String>,

    /// Abort the multipart session when a part fails
    #[arg(long)]
    pub abort_on_error: bool,
}

impl MergeArgs {
    pub fn to_options(&self, config: &Config) -> Result<MergeOptions> {
        let mut config = config.clone();
        if let Some(threshold) = &self.part_threshold {
            config.part_threshold = Config::parse_size(threshold)?;
            if config.flush_threshold < config.part_threshold {
                config.flush_threshold = config.part_threshold;
            }
        }
        config.validate()?;

        let mut options = MergeOptions::from_config(&config);
        options.dry_run = self.dry_run;
        options.abort_on_error = self.abort_on_error || config.abort_on_error;
        if let Some(content_type) = &self.content_type {
            options.content_type = content_type.clone();
        }
        if self.acl.is_some() {
            options.acl = self.acl.clone();
        }
        Ok(options)
    }
}

/// Arguments for the multipart command
#[derive(Args, Debug)]
pub struct MultipartArgs {
    #[command(subcommand)]
    pub action: MultipartCommand,
}

#[derive(Subcommand, Debug)]
pub enum MultipartCommand {
    /// List unfinished uploads
    List {
        /// s3:// prefixes to inspect
        #[arg(required = true)]
        targets: Vec<String>,

        /// Include uploads below sub-prefixes
        #[arg(short, long)]
        recursive: bool,

        /// Show parts and sizes
        #[arg(short, long)]
        long: bool,
    },

    /// Abort (or complete) unfinished uploads
    Clean {
        /// s3:// prefixes to clean
        #[arg(required = true)]
        targets: Vec<String>,

        /// Include uploads below sub-prefixes
        #[arg(short, long)]
        recursive: bool,

        /// Only touch the upload with this id
        #[arg(long)]
        id: Option<String>,

        /// Complete with the uploaded parts instead of aborting
        #[arg(long)]
        complete: bool,
    },
}

/// Arguments for the du command
#[derive(Args, Debug)]
pub struct DuArgs {
    /// s3:// prefixes to measure
    #[arg(required = true)]
    pub targets: Vec<String>,
}

/// Arguments for the config command
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Show the configuration file path
    #[arg(long)]
    pub path: bool,

    /// Create default configuration file
    #[arg(long)]
    pub init: bool,
}
