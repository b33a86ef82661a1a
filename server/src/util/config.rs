use std::net::SocketAddr;
use std::path::PathBuf;

const ADDR_VAR: &str = "HUB_ADDR";
const DATA_DIR_VAR: &str = "HUB_DATA_DIR";
const ALLOW_ORIGIN_VAR: &str = "HUB_ALLOW_ORIGIN";
const UI_DIR_VAR: &str = "HUB_UI_DIR";
const LOG_LEVEL_VAR: &str = "HUB_LOG_LEVEL";

/// The fully resolved configuration for one run of the server: CLI flags
/// (spec §6.1), each overridable by its environment variable.
pub(crate) struct Configuration {
	pub(crate) addr: SocketAddr,
	pub(crate) data_dir: PathBuf,
	pub(crate) allow_origin: String,
	pub(crate) ui_dir: Option<PathBuf>,
	pub(crate) log_level: String,
}

#[derive(Default)]
struct Flags {
	addr: Option<String>,
	data_dir: Option<String>,
	allow_origin: Option<String>,
	ui_dir: Option<String>,
}

#[inline]
fn read_env(var: &str) -> Option<String> {
	std::env::var(var).ok()
}

fn parse_flags(args: &[String]) -> Result<Flags, String> {
	let mut flags = Flags::default();
	let mut i = 0;
	while i < args.len() {
		let (name, inline_value) = match args[i].split_once('=') {
			Some((n, v)) => (n.to_string(), Some(v.to_string())),
			None => (args[i].clone(), None),
		};
		let value = match inline_value {
			Some(v) => v,
			None => {
				i += 1;
				args.get(i).cloned().ok_or_else(|| format!("{name} requires a value"))?
			},
		};
		match name.as_str() {
			"--addr" => flags.addr = Some(value),
			"--data-dir" => flags.data_dir = Some(value),
			"--allow-origin" => flags.allow_origin = Some(value),
			"--ui-dir" => flags.ui_dir = Some(value),
			other => return Err(format!("unrecognized flag: {other}")),
		}
		i += 1;
	}
	Ok(flags)
}

/// Parses `":8090"`-style Go-flag-conventional bind addresses (host-less
/// meaning "all interfaces") in addition to plain `host:port`.
fn parse_bind_addr(addr: &str) -> Result<SocketAddr, String> {
	let normalized =
		if let Some(port) = addr.strip_prefix(':') { format!("0.0.0.0:{port}") } else { addr.to_string() };
	normalized.parse().map_err(|e| format!("invalid --addr '{addr}': {e}"))
}

/// Resolves configuration from CLI args (excluding argv[0]) and environment
/// variable overrides, applying spec §6.1's defaults for anything unset.
pub(crate) fn load_configuration(args: &[String]) -> Result<Configuration, String> {
	let flags = parse_flags(args)?;

	let addr_str = read_env(ADDR_VAR).or(flags.addr).unwrap_or_else(|| ":8090".to_string());
	let addr = parse_bind_addr(&addr_str)?;

	let data_dir =
		PathBuf::from(read_env(DATA_DIR_VAR).or(flags.data_dir).unwrap_or_else(|| "./data".to_string()));

	let allow_origin =
		read_env(ALLOW_ORIGIN_VAR).or(flags.allow_origin).unwrap_or_else(|| "*".to_string());

	let ui_dir = read_env(UI_DIR_VAR)
		.or(flags.ui_dir)
		.filter(|s| !s.is_empty())
		.map(PathBuf::from);

	let log_level = read_env(LOG_LEVEL_VAR).unwrap_or_else(|| "info".to_string());

	Ok(Configuration { addr, data_dir, allow_origin, ui_dir, log_level })
}
