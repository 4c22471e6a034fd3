//! apidoc → clap Command tree, and ArgMatches → API call
//!
//! Structure: `<name> [connection flags] <resource> <action> [--<param> value] [--json ..] [--field k=v]`

use std::collections::BTreeSet;

use clap::{Arg, ArgAction, ArgMatches, Command};
use serde_json::{Map, Value};

use crate::api::{Api, ApiConfig, CallOptions};
use crate::apidoc::{ApiDoc, MethodDoc, ParamDoc};
use crate::error::CliError;

/// Long flags owned by the CLI itself; params with these names are only
/// reachable through `--json` or `--field`.
const RESERVED_LONGS: &[&str] = &[
    "uri",
    "username",
    "password",
    "language",
    "api-version",
    "cache-dir",
    "insecure",
    "skip-validation",
    "json",
    "field",
    "help",
];

/// Root command settings.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct CliConfig {
    /// Root command name (e.g. "apipie", "hammer")
    pub name: String,
    /// Root command about/description
    pub about: String,
}

impl CliConfig {
    pub fn new(name: impl Into<String>, about: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            about: about.into(),
        }
    }
}

/// Add the global connection flags to `cmd`.
pub fn connection_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("uri")
            .long("uri")
            .env("APIPIE_URI")
            .global(true)
            .help("Server base URL"),
    )
    .arg(
        Arg::new("username")
            .long("username")
            .short('u')
            .env("APIPIE_USERNAME")
            .global(true)
            .help("User for basic authentication"),
    )
    .arg(
        Arg::new("password")
            .long("password")
            .short('p')
            .env("APIPIE_PASSWORD")
            .hide_env_values(true)
            .global(true)
            .help("Password for basic authentication"),
    )
    .arg(
        Arg::new("language")
            .long("language")
            .env("APIPIE_LANGUAGE")
            .global(true)
            .help("Preferred language of the API documentation, e.g. en_US"),
    )
    .arg(
        Arg::new("api-version")
            .long("api-version")
            .env("APIPIE_API_VERSION")
            .default_value("1")
            .global(true)
            .help("API version"),
    )
    .arg(
        Arg::new("cache-dir")
            .long("cache-dir")
            .env("APIPIE_CACHE_DIR")
            .global(true)
            .help("Base directory of the apidoc cache"),
    )
    .arg(
        Arg::new("insecure")
            .long("insecure")
            .global(true)
            .action(ArgAction::SetTrue)
            .help("Do not verify TLS certificates"),
    )
}

/// The connection flags alone, parsed before the apidoc is loaded.
///
/// Anything after the first positional word is collected as an external
/// subcommand and left to the full command tree. `--help` is a plain flag
/// so the caller can print [`connection_args`] help when no URI is known.
pub fn bootstrap_command(config: &CliConfig) -> Command {
    connection_args(Command::new(config.name.clone()).about(config.about.clone()))
        .allow_external_subcommands(true)
        .disable_help_flag(true)
        .arg(
            Arg::new("help")
                .long("help")
                .short('h')
                .action(ArgAction::SetTrue)
                .help("Print help"),
        )
        .ignore_errors(true)
}

/// Build an [`ApiConfig`] from matches of a command carrying [`connection_args`].
pub fn config_from_matches(matches: &ArgMatches) -> Result<ApiConfig, CliError> {
    let uri = matches
        .get_one::<String>("uri")
        .ok_or(CliError::MissingArgument("uri"))?;
    let version = matches
        .get_one::<String>("api-version")
        .map(String::as_str)
        .unwrap_or("1");
    let version: u32 = version
        .parse()
        .map_err(|_| CliError::InvalidApiVersion(version.to_string()))?;

    let mut config = ApiConfig::new(uri.clone())
        .api_version(version)
        .verify_ssl(!matches.get_flag("insecure"));
    if let Some(language) = matches.get_one::<String>("language") {
        config = config.language(language.clone());
    }
    if let Some(dir) = matches.get_one::<String>("cache-dir") {
        config = config.apidoc_cache_base_dir(dir);
    }
    if let Some(username) = matches.get_one::<String>("username") {
        let password = matches
            .get_one::<String>("password")
            .ok_or(CliError::MissingArgument("password"))?;
        config = config.basic_auth(username.clone(), password.clone());
    }
    Ok(config)
}

/// Build a clap `Command` tree from an API description.
///
/// One subcommand per resource, one nested subcommand per action, one
/// `--<param>` option per top-level param of the action.
pub fn build_commands(config: &CliConfig, doc: &ApiDoc) -> Command {
    let root = Command::new(config.name.clone())
        .about(config.about.clone())
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("skip-validation")
                .long("skip-validation")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Send the request without validating params"),
        );
    let mut root = connection_args(root);

    for (resource_name, resource) in &doc.docs.resources {
        let mut resource_cmd = Command::new(normalize_name(resource_name))
            .about(format!("Manage {resource_name}"))
            .subcommand_required(true)
            .arg_required_else_help(true);

        let mut seen = BTreeSet::new();
        for method in &resource.methods {
            let cmd_name = normalize_name(&method.name);
            // Duplicate names would panic in clap
            if cmd_name.is_empty() || !seen.insert(cmd_name.clone()) {
                continue;
            }
            resource_cmd = resource_cmd.subcommand(build_action_command(method, &cmd_name));
        }

        root = root.subcommand(resource_cmd);
    }

    root
}

fn build_action_command(method: &MethodDoc, cmd_name: &str) -> Command {
    let about = method
        .apis
        .iter()
        .map(|api| api.short_description.as_str())
        .find(|d| !d.is_empty())
        .unwrap_or_default()
        .to_string();
    let mut cmd = Command::new(cmd_name.to_owned()).about(about);

    for (param, long) in option_params(method) {
        cmd = cmd.arg(
            Arg::new(param.name.clone())
                .long(long)
                .help(crate::param::strip_html(&param.description))
                .action(ArgAction::Set),
        );
    }

    cmd.arg(
        Arg::new("json-body")
            .long("json")
            .short('j')
            .help("All params as a JSON object")
            .action(ArgAction::Set),
    )
    .arg(
        Arg::new("field")
            .long("field")
            .short('f')
            .help("Set param: key=value, value parsed as JSON (repeatable)")
            .action(ArgAction::Append),
    )
}

/// Top-level params exposed as `--<param>` options, with their long flag.
fn option_params(method: &MethodDoc) -> Vec<(&ParamDoc, String)> {
    let mut longs = BTreeSet::new();
    method
        .params
        .iter()
        .filter_map(|param| {
            let long = normalize_name(&param.name);
            if long.is_empty()
                || matches!(param.name.as_str(), "json-body" | "field")
                || RESERVED_LONGS.contains(&long.as_str())
                || !longs.insert(long.clone())
            {
                return None;
            }
            Some((param, long))
        })
        .collect()
}

/// Map normalized command names back to the resource and action names.
pub fn find_action(doc: &ApiDoc, resource_cmd: &str, action_cmd: &str) -> Option<(String, String)> {
    let (resource_name, resource) = doc
        .docs
        .resources
        .iter()
        .find(|(name, _)| normalize_name(name) == resource_cmd)?;
    let method = resource
        .methods
        .iter()
        .find(|m| normalize_name(&m.name) == action_cmd)?;
    Some((resource_name.clone(), method.name.clone()))
}

/// Execute the action selected by `matches` through `api`.
pub fn dispatch(api: &Api, matches: &ArgMatches) -> Result<Option<Value>, CliError> {
    let (resource_cmd, resource_matches) = matches
        .subcommand()
        .ok_or_else(|| CliError::UnknownCommand(String::new()))?;
    let (action_cmd, action_matches) = resource_matches
        .subcommand()
        .ok_or_else(|| CliError::UnknownCommand(resource_cmd.to_string()))?;

    let doc = api.apidoc()?;
    let (resource, action) = find_action(&doc, resource_cmd, action_cmd)
        .ok_or_else(|| CliError::UnknownCommand(format!("{resource_cmd} {action_cmd}")))?;
    let method = doc
        .resource(&resource)
        .and_then(|r| r.method(&action))
        .ok_or_else(|| CliError::UnknownCommand(format!("{resource_cmd} {action_cmd}")))?;

    let params = collect_params(method, action_matches)?;
    let options =
        CallOptions::new().with_skip_validation(action_matches.get_flag("skip-validation"));
    Ok(api.call_with(&resource, &action, &params, &options)?)
}

/// `--json` first, then `--field` pairs, then the per-param options.
fn collect_params(method: &MethodDoc, matches: &ArgMatches) -> Result<Map<String, Value>, CliError> {
    let mut params = match matches.get_one::<String>("json-body") {
        Some(json_str) => match serde_json::from_str(json_str).map_err(CliError::InvalidJsonBody)? {
            Value::Object(obj) => obj,
            _ => return Err(CliError::JsonBodyNotObject),
        },
        None => Map::new(),
    };

    if let Some(fields) = matches.get_many::<String>("field") {
        for field in fields {
            let (key, val) = field
                .split_once('=')
                .ok_or_else(|| CliError::InvalidFieldFormat {
                    field: field.to_string(),
                })?;
            params.insert(key.to_string(), parse_value(val));
        }
    }

    for (param, _) in option_params(method) {
        if let Some(val) = matches.get_one::<String>(&param.name) {
            params.insert(param.name.clone(), parse_value(val));
        }
    }
    Ok(params)
}

// Try to parse as JSON value, fall back to string
fn parse_value(val: &str) -> Value {
    serde_json::from_str(val).unwrap_or_else(|_| Value::String(val.to_string()))
}

/// Lowercase, with every run of non-alphanumerics collapsed to a single `-`.
pub fn normalize_name(name: &str) -> String {
    let mut result = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_alphanumeric() {
            result.push(c.to_ascii_lowercase());
        } else if !result.is_empty() && !result.ends_with('-') {
            result.push('-');
        }
    }
    while result.ends_with('-') {
        result.pop();
    }
    result
}
