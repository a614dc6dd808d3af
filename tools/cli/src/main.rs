//! Lockbox CLI - Command line interface for the file vault.
//!
//! This tool provides a command-line interface for registering users,
//! uploading and downloading encrypted files, and sharing them.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use lockbox_common::{Error, FileId};
use lockbox_vault::{
    share_path, DecryptedFile, GrantOptions, GrantOutcome, LinkState, Permission, User,
    VaultConfig, VaultService, LINK_INVALID_MESSAGE,
};

#[derive(Parser)]
#[command(name = "lockbox")]
#[command(about = "Lockbox - Encrypted per-user file vault")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Data directory (default: platform data dir).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// JSON configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory and encryption key.
    Init,

    /// Print the effective configuration as JSON.
    Config,

    /// Register a new user.
    Register {
        /// Username to register.
        username: String,
    },

    /// Upload one or more files.
    Upload {
        /// Acting user.
        #[arg(short = 'u', long = "as", value_name = "USER")]
        user: String,

        /// Files to upload.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Download and decrypt a file.
    Download {
        /// Acting user.
        #[arg(short = 'u', long = "as", value_name = "USER")]
        user: String,

        /// File id.
        file: FileId,

        /// Output path (default: original filename in the current directory).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite an existing output file.
        #[arg(short, long)]
        force: bool,
    },

    /// Share a file with another user.
    Share {
        /// Acting user (the file owner).
        #[arg(short = 'u', long = "as", value_name = "USER")]
        user: String,

        /// File id.
        file: FileId,

        /// User to share with.
        grantee: String,

        /// Permission: "view" or "download".
        #[arg(short, long, default_value = "view")]
        permission: Permission,

        /// Grant again even if already shared.
        #[arg(short, long)]
        force: bool,

        /// Expire the grant after this many hours.
        #[arg(long)]
        expires_hours: Option<u32>,
    },

    /// List grants of a file you own.
    Shares {
        /// Acting user (the file owner).
        #[arg(short = 'u', long = "as", value_name = "USER")]
        user: String,

        /// File id.
        file: FileId,
    },

    /// Create a one-time share link.
    Link {
        /// Acting user (the file owner).
        #[arg(short = 'u', long = "as", value_name = "USER")]
        user: String,

        /// File id.
        file: FileId,
    },

    /// Show the state of a share link without using it.
    LinkStatus {
        /// Link token.
        token: String,
    },

    /// Redeem a share link and save the file.
    Redeem {
        /// Link token.
        token: String,

        /// Output path (default: original filename in the current directory).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite an existing output file.
        #[arg(short, long)]
        force: bool,
    },

    /// Delete a file you own.
    Delete {
        /// Acting user (the file owner).
        #[arg(short = 'u', long = "as", value_name = "USER")]
        user: String,

        /// File id.
        file: FileId,
    },

    /// List your files and files shared with you.
    List {
        /// Acting user.
        #[arg(short = 'u', long = "as", value_name = "USER")]
        user: String,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(cli.config.as_deref(), cli.data_dir)?;

    match cli.command {
        Commands::Init => cmd_init(config).await,

        Commands::Config => cmd_config(&config),

        Commands::Register { username } => cmd_register(config, &username).await,

        Commands::Upload { user, files } => cmd_upload(config, &user, &files).await,

        Commands::Download {
            user,
            file,
            output,
            force,
        } => cmd_download(config, &user, file, output, force).await,

        Commands::Share {
            user,
            file,
            grantee,
            permission,
            force,
            expires_hours,
        } => {
            let options = GrantOptions {
                force,
                expires_at: expires_hours.map(|h| Utc::now() + Duration::hours(i64::from(h))),
            };
            cmd_share(config, &user, file, &grantee, permission, options).await
        }

        Commands::Shares { user, file } => cmd_shares(config, &user, file).await,

        Commands::Link { user, file } => cmd_link(config, &user, file).await,

        Commands::LinkStatus { token } => cmd_link_status(config, &token).await,

        Commands::Redeem {
            token,
            output,
            force,
        } => cmd_redeem(config, &token, output, force).await,

        Commands::Delete { user, file } => cmd_delete(config, &user, file).await,

        Commands::List { user, json } => cmd_list(config, &user, json).await,
    }
}

/// Resolve configuration from flags.
fn load_config(config_file: Option<&Path>, data_dir: Option<PathBuf>) -> Result<VaultConfig> {
    let mut config = match config_file {
        Some(path) => VaultConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => VaultConfig::with_data_dir(default_data_dir()),
    };

    if let Some(dir) = data_dir {
        config.data_dir = dir;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("lockbox"))
        .unwrap_or_else(|| PathBuf::from("lockbox-data"))
}

async fn open_service(config: VaultConfig) -> Result<VaultService> {
    VaultService::open(config)
        .await
        .context("Failed to open vault")
}

fn acting_user(service: &VaultService, username: &str) -> Result<User> {
    service
        .find_user(username)
        .with_context(|| format!("Unknown user '{}'", username))
}

/// Initialize the data directory and key.
async fn cmd_init(config: VaultConfig) -> Result<()> {
    let service = open_service(config).await?;
    let config = service.config();

    println!("Vault ready.");
    println!("  Data directory: {}", config.data_dir.display());
    println!("  Database: {}", config.database_path().display());
    println!("  Key file: {}", config.key_file_path().display());

    Ok(())
}

fn cmd_config(config: &VaultConfig) -> Result<()> {
    println!("{}", config.to_json()?);
    Ok(())
}

async fn cmd_register(config: VaultConfig, username: &str) -> Result<()> {
    let service = open_service(config).await?;
    let user = service
        .register_user(username)
        .context("Failed to register user")?;

    println!("Registered user '{}' (id {})", user.username, user.id);
    Ok(())
}

/// Upload files, reporting each one separately.
async fn cmd_upload(config: VaultConfig, username: &str, files: &[PathBuf]) -> Result<()> {
    let service = open_service(config).await?;
    let owner = acting_user(&service, username)?;

    let mut failed = 0;
    for path in files {
        match upload_one(&service, &owner, path).await {
            Ok((id, name, size)) => {
                println!("Uploaded {} as file {} ({} bytes)", name, id, size);
            }
            Err(e) => {
                failed += 1;
                eprintln!("Failed to upload {}: {:#}", path.display(), e);
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} uploads failed", failed, files.len());
    }
    Ok(())
}

async fn upload_one(
    service: &VaultService,
    owner: &User,
    path: &Path,
) -> Result<(FileId, String, usize)> {
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .context("Path has no valid filename")?
        .to_string();

    let data = tokio::fs::read(path)
        .await
        .context("Failed to read source file")?;

    let record = service.upload(owner.id, &filename, &data).await?;
    Ok((record.id, filename, data.len()))
}

/// Download a file the user may access.
async fn cmd_download(
    config: VaultConfig,
    username: &str,
    file: FileId,
    output: Option<PathBuf>,
    force: bool,
) -> Result<()> {
    let service = open_service(config).await?;
    let user = acting_user(&service, username)?;

    let decrypted = service
        .download(file, user.id)
        .await
        .context("Download failed")?;

    let dest = Destination::claim(
        output.unwrap_or_else(|| PathBuf::from(decrypted.filename())),
        force,
    )?;
    let path = dest.path.clone();
    let written = dest.write(&decrypted)?;
    print_saved(decrypted.filename(), &path, written);
    Ok(())
}

fn print_saved(filename: &str, dest: &Path, written: u64) {
    println!("Saved {} to {} ({} bytes)", filename, dest.display(), written);
}

/// Output file claimed before anything irreversible happens.
struct Destination {
    path: PathBuf,
    /// Newly created empty file; `None` when overwriting with `--force`.
    reserved: Option<File>,
}

impl Destination {
    /// Claim `path`, failing if it exists unless `force` is set.
    fn claim(path: PathBuf, force: bool) -> Result<Self> {
        if force {
            return Ok(Self {
                path,
                reserved: None,
            });
        }

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => Ok(Self {
                path,
                reserved: Some(file),
            }),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => anyhow::bail!(
                "{} already exists; use --force to overwrite",
                path.display()
            ),
            Err(e) => Err(e).with_context(|| format!("Failed to create {}", path.display())),
        }
    }

    /// Write the plaintext, removing a claimed file if that fails.
    fn write(self, decrypted: &DecryptedFile) -> Result<u64> {
        let created = self.reserved.is_some();
        let result = self.write_inner(decrypted);
        if result.is_err() && created {
            let _ = std::fs::remove_file(&self.path);
        }
        result.with_context(|| format!("Failed to write {}", self.path.display()))
    }

    fn write_inner(&self, decrypted: &DecryptedFile) -> Result<u64> {
        let mut file = match &self.reserved {
            Some(file) => file.try_clone()?,
            None => File::create(&self.path)?,
        };
        let written = decrypted.write_to(&mut file)?;
        file.sync_all()?;
        Ok(written)
    }

    /// Give up a claim, deleting the file if it was created for it.
    fn release(self) {
        if self.reserved.is_some() {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

async fn cmd_share(
    config: VaultConfig,
    username: &str,
    file: FileId,
    grantee: &str,
    permission: Permission,
    options: GrantOptions,
) -> Result<()> {
    let service = open_service(config).await?;
    let owner = acting_user(&service, username)?;
    let grantee = acting_user(&service, grantee)?;

    let outcome = service.share(file, owner.id, grantee.id, permission, options);
    match outcome {
        Ok(GrantOutcome::Granted(grant)) => {
            println!(
                "Shared file {} with {} ({})",
                file, grantee.username, grant.permission
            );
            if let Some(expires) = grant.expires_at {
                println!("  Expires: {}", expires.to_rfc3339());
            }
        }
        Ok(GrantOutcome::AlreadyShared { existing }) => {
            println!(
                "File {} is already shared with {} ({}); use --force to share again",
                file, grantee.username, existing.permission
            );
        }
        Err(Error::SelfShare) => anyhow::bail!("You cannot share a file with yourself"),
        Err(e) => return Err(e).context("Share failed"),
    }

    Ok(())
}

async fn cmd_shares(config: VaultConfig, username: &str, file: FileId) -> Result<()> {
    let service = open_service(config).await?;
    let owner = acting_user(&service, username)?;

    let grants = service
        .shares()
        .grants_of(file, owner.id)
        .context("Failed to list shares")?;

    if grants.is_empty() {
        println!("File {} is not shared.", file);
        return Ok(());
    }

    let now = Utc::now();
    println!("Shares of file {}:", file);
    for grant in grants {
        let name = service
            .records()
            .get_user(grant.granted_to)?
            .map(|u| u.username)
            .unwrap_or_else(|| grant.granted_to.to_string());
        let expiry = match grant.expires_at {
            Some(at) if !grant.is_active_at(now) => format!("expired {}", at.to_rfc3339()),
            Some(at) => format!("until {}", at.to_rfc3339()),
            None => "no expiry".to_string(),
        };
        println!("  {:<20} {:<9} {}", name, grant.permission, expiry);
    }

    Ok(())
}

async fn cmd_link(config: VaultConfig, username: &str, file: FileId) -> Result<()> {
    let service = open_service(config).await?;
    let owner = acting_user(&service, username)?;

    let link = service
        .generate_link(file, owner.id)
        .context("Failed to create link")?;

    println!("{}", share_path(&link.token));
    println!("  Valid until: {}", link.expires_at.to_rfc3339());
    println!("  Single use: the link stops working after the first access.");
    Ok(())
}

async fn cmd_link_status(config: VaultConfig, token: &str) -> Result<()> {
    let service = open_service(config).await?;

    let (link, state) = service.inspect_link(token)?;
    let label = match state {
        LinkState::Active => "active",
        LinkState::Expired => "expired",
        LinkState::Consumed => "used",
    };

    println!("Link for file {}: {}", link.file, label);
    println!("  Created: {}", link.created_at.to_rfc3339());
    println!("  Expires: {}", link.expires_at.to_rfc3339());
    Ok(())
}

async fn cmd_redeem(
    config: VaultConfig,
    token: &str,
    output: Option<PathBuf>,
    force: bool,
) -> Result<()> {
    let service = open_service(config).await?;

    let (path, filename, written) = redeem_to(&service, token, output, force).await?;
    info!("Link redeemed");

    print_saved(&filename, &path, written);
    Ok(())
}

/// Redeem `token` into a file, claiming the destination first.
///
/// The link is only consumed once the destination is secured, so a bad
/// output path leaves it usable.
async fn redeem_to(
    service: &VaultService,
    token: &str,
    output: Option<PathBuf>,
    force: bool,
) -> Result<(PathBuf, String, u64)> {
    let path = match output {
        Some(path) => path,
        None => PathBuf::from(link_filename(service, token)?),
    };
    let dest = Destination::claim(path, force)?;

    let decrypted = match service.access_link(token).await {
        Ok(decrypted) => decrypted,
        Err(e) => {
            dest.release();
            return Err(e.into());
        }
    };

    let path = dest.path.clone();
    let written = dest.write(&decrypted)?;
    Ok((path, decrypted.filename().to_string(), written))
}

/// Filename behind an active link, looked up without consuming it.
fn link_filename(service: &VaultService, token: &str) -> Result<String> {
    let (link, state) = service.inspect_link(token)?;
    let record = match state {
        LinkState::Active => service.records().get_file(link.file)?,
        LinkState::Expired | LinkState::Consumed => None,
    };
    record
        .map(|record| record.filename)
        .ok_or_else(|| Error::LinkInvalid(LINK_INVALID_MESSAGE.to_string()).into())
}

async fn cmd_delete(config: VaultConfig, username: &str, file: FileId) -> Result<()> {
    let service = open_service(config).await?;
    let owner = acting_user(&service, username)?;

    service
        .delete_file(file, owner.id)
        .await
        .context("Delete failed")?;

    println!("Deleted file {}", file);
    Ok(())
}

async fn cmd_list(config: VaultConfig, username: &str, json: bool) -> Result<()> {
    let service = open_service(config).await?;
    let user = acting_user(&service, username)?;

    let listing = service.list_files(user.id)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    if listing.owned.is_empty() {
        println!("You have no files.");
    } else {
        println!("Your files:");
        for file in &listing.owned {
            println!(
                "  [{:>4}] {} (uploaded {})",
                file.id.0,
                file.filename,
                file.uploaded_at.format("%Y-%m-%d %H:%M")
            );
        }
    }

    if !listing.shared.is_empty() {
        println!("Shared with you:");
        for shared in &listing.shared {
            let from = service
                .records()
                .get_user(shared.shared_by)?
                .map(|u| u.username)
                .unwrap_or_else(|| shared.shared_by.to_string());
            println!(
                "  [{:>4}] {} ({} from {})",
                shared.file.id.0, shared.file.filename, shared.permission, from
            );
        }
    }

    Ok(())
}
