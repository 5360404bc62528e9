use std::net::{IpAddr, SocketAddr};

use confindent::Confindent;
use getopts::Options;
use ration::{store::Tables, EngineSettings};
use sqlx::mysql::MySqlConnectOptions;
use thiserror::Error;

use crate::net::ConnectionLimit;

const DEFAULT_CONFIG: &str = "/etc/rationd/rationd.conf";
const FALLBACK_CONFIG: &str = "rationd.conf";

pub struct Config {
	pub address: IpAddr,
	pub port: u16,
	pub debug: bool,
	pub database: Database,
	pub tables: Tables,
	pub engine: EngineSettings,
	pub reputation_address: Option<String>,
	pub connection_limit: ConnectionLimit,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Database {
	pub user: String,
	pub password: String,
	pub host: String,
	pub port: u16,
	pub name: String,
}

impl Database {
	pub fn connect_options(&self) -> MySqlConnectOptions {
		MySqlConnectOptions::new()
			.host(&self.host)
			.port(self.port)
			.username(&self.user)
			.password(&self.password)
			.database(&self.name)
	}
}

impl Config {
	fn print_usage<S: AsRef<str>>(prgm: S, opts: &Options) {
		let brief = format!("Usage: {} [options]", prgm.as_ref());
		println!("{}", opts.usage(&brief));
	}

	pub fn socket_address(&self) -> SocketAddr {
		SocketAddr::new(self.address, self.port)
	}

	/// Reads the command line and the config file. `Ok(None)` means there is
	/// nothing to run, e.g. only help was asked for.
	pub fn get() -> Result<Option<Self>, ConfigError> {
		let args: Vec<String> = std::env::args().collect();

		let mut opts = Options::new();
		opts.optflag("h", "help", "Print this help message");
		opts.optflag(
			"d",
			"debug",
			"Log verbosely. Overridden by RUST_LOG when it is set",
		);
		opts.optopt(
			"b",
			"bind",
			"The IP address to listen for policy requests on\nDefault: 127.0.0.1",
			"IP_ADDR",
		);
		opts.optopt("p", "port", "The port to listen on\nDefault: 10032", "PORT");
		opts.optopt(
			"c",
			"config",
			&format!(
				"An alternate location to read the config from\nDefault: {}",
				DEFAULT_CONFIG
			),
			"PATH",
		);

		let matches = opts.parse(&args[1..])?;

		if matches.opt_present("help") {
			Self::print_usage(&args[0], &opts);
			return Ok(None);
		}

		let conf_path = matches
			.opt_str("config")
			.unwrap_or_else(|| DEFAULT_CONFIG.into());

		let config = match Confindent::from_file(&conf_path) {
			Ok(c) => c,
			Err(_) => match Confindent::from_file(FALLBACK_CONFIG) {
				Ok(c) => c,
				Err(err) => {
					return Err(ConfigError::File {
						path: conf_path,
						message: err.to_string(),
					})
				}
			},
		};

		// Options given on the command line take priority over the file. Only
		// the listen address has a command line form.
		let find_value = |key: &str| -> Option<String> {
			let cli = match key {
				"bind" | "port" => matches.opt_str(key),
				_ => None,
			};

			cli.or_else(|| config.child_value(key).map(|s| s.into()))
		};

		Self::from_lookup(find_value, matches.opt_present("debug")).map(Some)
	}

	/// Builds the configuration from a key lookup, one key per config file
	/// option.
	pub fn from_lookup<F>(find_value: F, debug: bool) -> Result<Self, ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		let value = |key: &'static str, default: &str| -> String {
			find_value(key)
				.map(|v| v.trim().to_owned())
				.filter(|v| !v.is_empty())
				.unwrap_or_else(|| default.into())
		};

		let address = parse("bind", value("bind", "127.0.0.1"))?;
		let port = parse("port", value("port", "10032"))?;

		let database = Database {
			user: value("dbuser", ""),
			password: find_value("dbpass").unwrap_or_default(),
			host: value("dbhost", "127.0.0.1"),
			port: parse("dbport", value("dbport", "3306"))?,
			name: match find_value("dbname").filter(|name| !name.trim().is_empty()) {
				Some(name) => name.trim().into(),
				None => return Err(ConfigError::Missing("dbname")),
			},
		};

		let tables = Tables {
			policy: value("policy_table", "policy"),
			badmailfrom: value("badmailfrom_table", "badmailfrom"),
			badmailto: value("badmailto_table", "badmailto"),
		};
		if let Err(err) = tables.validate() {
			return Err(ConfigError::InvalidTables(err.to_string()));
		}

		let default_max: f64 = parse("defaultquota", value("defaultquota", "100"))?;
		if !default_max.is_finite() || default_max < 0.0 {
			return Err(ConfigError::InvalidValue {
				key: "defaultquota",
				value: default_max.to_string(),
			});
		}

		let engine = EngineSettings {
			default_max,
			sender_accounting: flag(&value("sender_accounting", "0")),
			quota_lock: parse("quota_lock", value("quota_lock", "row"))?,
		};

		let reputation_address = find_value("reputation_redis_address")
			.map(|addr| addr.trim().to_owned())
			.filter(|addr| !addr.is_empty());

		let connection_limit =
			ConnectionLimit::from_count(parse("max_connections", value("max_connections", "0"))?);

		Ok(Self {
			address,
			port,
			debug,
			database,
			tables,
			engine,
			reputation_address,
			connection_limit,
		})
	}
}

fn parse<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
	value
		.parse()
		.map_err(|_| ConfigError::InvalidValue { key, value })
}

// Boolean options are written as strings; "1" is what older configs use
fn flag(value: &str) -> bool {
	matches!(
		value.to_lowercase().as_str(),
		"1" | "true" | "yes" | "on"
	)
}

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("{0}")]
	Arguments(#[from] getopts::Fail),
	#[error("failed to parse conf file {path}: {message}")]
	File { path: String, message: String },
	#[error("'{0}' is required in the conf file")]
	Missing(&'static str),
	#[error("failed to parse '{value}' as a value for '{key}'")]
	InvalidValue { key: &'static str, value: String },
	#[error("{0}")]
	InvalidTables(String),
}
