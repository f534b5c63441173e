use crate::engine::rule::Rule;
use crate::shared::dns;
use std::fmt::{self, Display, Formatter};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{fs, io};

/// Configuration values obtained parsing the directive files. A
/// configuration path may be a single file or a directory, in which case
/// every regular file inside it is parsed, in lexicographic order.
///
/// The accepted line syntax (`#` starts a comment, blank lines ignored):
///
/// ```text
/// log-level      = info
/// listen-address = 127.0.0.1
/// listen-port    = 5335
/// cache-size     = 1000
/// server  = 8.8.8.8                  # default upstream
/// server  = /google.com/1.1.1.3      # per-domain upstream
/// address = /router.my/192.168.1.1   # static A record
/// block   = /facebook.com/
/// route   = /apple.com/10.0.0.1
/// ```
#[derive(Debug)]
pub struct Conf {
    pub log_level: log::Level,
    pub listen_address: Ipv4Addr,
    pub listen_port: u16,
    pub cache_size: usize,
    pub upstreams: Vec<Ipv4Addr>,
    pub rules: Vec<Rule>,
}

impl Default for Conf {
    fn default() -> Self {
        Conf {
            log_level: log::Level::Info,
            listen_address: Ipv4Addr::new(127, 0, 0, 1),
            listen_port: 53,
            cache_size: 1000,
            upstreams: vec![],
            rules: vec![],
        }
    }
}

/// All the errors found parsing the configuration, each one carrying its
/// `<file>:<line>` position. Any error aborts startup.
#[derive(Debug)]
pub struct ConfErr {
    pub errors: Vec<String>,
}

impl Display for ConfErr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "configuration errors found:")?;
        for error in &self.errors {
            write!(f, "\n  {}", error)?;
        }
        Ok(())
    }
}

impl From<io::Error> for ConfErr {
    fn from(err: io::Error) -> Self {
        ConfErr { errors: vec![err.to_string()] }
    }
}

impl Conf {
    /// Read and parse the configuration from the passed path (a directive
    /// file or a directory of directive files).
    pub fn load(path: &str) -> Result<Conf, ConfErr> {
        let mut files: Vec<PathBuf> = vec![];
        if Path::new(path).is_dir() {
            for dir_entry in fs::read_dir(path)? {
                let file_path = dir_entry?.path();
                if file_path.is_file() {
                    files.push(file_path);
                }
            }
            files.sort();
            if files.is_empty() {
                let err = format!("no configuration file found in '{}'", path);
                return Err(ConfErr { errors: vec![err] });
            }
        } else {
            files.push(PathBuf::from(path));
        }

        let mut parser = Parser::default();
        for file_path in &files {
            let content = fs::read_to_string(file_path)?;
            parser.parse_file(&file_path.display().to_string(), &content);
        }
        parser.finish()
    }

    /// The subset of rules carrying a static `address` record, to be
    /// pinned into the response cache at startup.
    pub fn statics(&self) -> Vec<&Rule> {
        self.rules.iter().filter(|rule| rule.address.is_some()).collect()
    }
}

#[derive(Default)]
struct Parser {
    conf: Conf,
    rules: Vec<Rule>,
    errors: Vec<String>,
}

impl Parser {
    fn parse_file(&mut self, file: &str, content: &str) {
        for (n, raw_line) in content.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Err(err) = self.parse_line(line) {
                self.errors.push(format!("{}:{}: {}", file, n + 1, err));
            }
        }
    }

    fn finish(mut self) -> Result<Conf, ConfErr> {
        if !self.errors.is_empty() {
            return Err(ConfErr { errors: self.errors });
        }
        self.conf.rules = self.rules;
        Ok(self.conf)
    }

    fn parse_line(&mut self, line: &str) -> Result<(), String> {
        let (key, value) = match line.split_once('=') {
            Some((key, value)) => (key.trim(), value.trim()),
            None => return Err("missing '=' in configuration line".to_string()),
        };
        match key {
            "log-level" => self.parse_log_level(value),
            "listen-address" => self.parse_listen_address(value),
            "listen-port" => self.parse_listen_port(value),
            "cache-size" => self.parse_cache_size(value),
            "server" => self.parse_server(value),
            "address" => self.parse_address(value),
            "block" => self.parse_block(value),
            "route" => self.parse_route(value),
            _ => Err(format!("unknown directive: '{}'", key)),
        }
    }

    fn parse_log_level(&mut self, value: &str) -> Result<(), String> {
        match log::Level::from_str(value) {
            Ok(level) => {
                self.conf.log_level = level;
                Ok(())
            }
            Err(_) => Err(format!("invalid log level: '{}'", value)),
        }
    }

    fn parse_listen_address(&mut self, value: &str) -> Result<(), String> {
        match value.parse() {
            Ok(address) => {
                self.conf.listen_address = address;
                Ok(())
            }
            Err(_) => Err(format!("invalid IP address in listen-address: '{}'", value)),
        }
    }

    fn parse_listen_port(&mut self, value: &str) -> Result<(), String> {
        match value.parse::<u16>() {
            Ok(port) if port >= 1 => {
                self.conf.listen_port = port;
                Ok(())
            }
            _ => Err(format!("port must be between 1 and 65535: '{}'", value)),
        }
    }

    fn parse_cache_size(&mut self, value: &str) -> Result<(), String> {
        match value.parse::<usize>() {
            Ok(size) if size <= 65535 => {
                self.conf.cache_size = size;
                Ok(())
            }
            _ => Err(format!("cache size must be between 0 and 65535: '{}'", value)),
        }
    }

    // Two forms: `server = <ip>` appends a default upstream, while
    // `server = /<domain>/<ip>` sets a per-domain one. Repeated lines for
    // the same domain accumulate into an ordered upstream list.
    fn parse_server(&mut self, value: &str) -> Result<(), String> {
        if !value.starts_with('/') {
            let upstream = parse_ip(value, "upstream")?;
            self.conf.upstreams.push(upstream);
            return Ok(());
        }
        let (domain, rest) = split_slashed(value)?;
        let upstream = parse_ip(rest, "upstream")?;
        let mut rule = Rule::empty(&domain);
        rule.upstream = Some(vec![upstream]);
        self.merge_rule(rule);
        Ok(())
    }

    fn parse_address(&mut self, value: &str) -> Result<(), String> {
        let (domain, rest) = split_slashed(value)?;
        let address = parse_ip(rest, "static address")?;
        let mut rule = Rule::empty(&domain);
        rule.address = Some(address);
        self.merge_rule(rule);
        Ok(())
    }

    fn parse_block(&mut self, value: &str) -> Result<(), String> {
        let (domain, rest) = split_slashed(value)?;
        if !rest.is_empty() {
            return Err(format!("block directive takes no value, got: '{}'", rest));
        }
        let mut rule = Rule::empty(&domain);
        rule.block = true;
        rule.refresh_dbr();
        self.merge_rule(rule);
        Ok(())
    }

    fn parse_route(&mut self, value: &str) -> Result<(), String> {
        let (domain, rest) = split_slashed(value)?;
        let nexthop = parse_ip(rest, "gateway")?;
        let mut rule = Rule::empty(&domain);
        rule.route = Some(nexthop);
        rule.refresh_dbr();
        self.merge_rule(rule);
        Ok(())
    }

    // Directives for the same domain can be spread over multiple lines,
    // they are merged into a single rule with the later lines winning.
    // Upstream lists are the exception and accumulate in file order.
    fn merge_rule(&mut self, mut rule: Rule) {
        let index = match self.rules.iter().position(|r| r.domain == rule.domain) {
            Some(index) => index,
            None => {
                self.rules.push(rule);
                return;
            }
        };
        let existing = &mut self.rules[index];
        if let Some(accumulated) = existing.upstream.as_mut() {
            if let Some(added) = rule.upstream.take() {
                for upstream in added {
                    if !accumulated.contains(&upstream) {
                        accumulated.push(upstream);
                    }
                }
            }
        }
        existing.merge_from(&rule);
    }
}

// Split a `/<domain>/<rest>` value, validating the domain pattern.
fn split_slashed(value: &str) -> Result<(String, &str), String> {
    let inner = match value.strip_prefix('/') {
        Some(inner) => inner,
        None => return Err(format!("expected '/<domain>/...', got: '{}'", value)),
    };
    let (domain, rest) = match inner.split_once('/') {
        Some((domain, rest)) => (domain.trim(), rest.trim()),
        None => return Err("missing closing '/' after domain".to_string()),
    };
    if let Err(err) = dns::validate_domain(domain, true) {
        return Err(format!("invalid domain '{}': {}", domain, err));
    }
    Ok((domain.to_ascii_lowercase(), rest))
}

fn parse_ip(value: &str, what: &str) -> Result<Ipv4Addr, String> {
    value
        .parse()
        .map_err(|_| format!("invalid {} IP address: '{}'", what, value))
}
