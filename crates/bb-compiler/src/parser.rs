use std::net::IpAddr;

use crate::rule::{CompiledRule, PartyMask, RequestType, RuleAction, SchemeMask};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Empty line")]
    Empty,
    #[error("Comment line")]
    Comment,
    #[error("Cosmetic filters do not compile to network rules")]
    Cosmetic,
    #[error("Unsupported option: {0}")]
    UnsupportedOption(String),
    #[error("Option list matches nothing: {0}")]
    EmptyMask(String),
    #[error("Invalid domain: {0}")]
    InvalidDomain(String),
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),
}

/// Compile one filter line into the network rules it installs.
///
/// Most filters produce one rule. A hosts-file line produces one rule per
/// listed host.
pub fn parse_filter(raw_line: &str) -> Result<Vec<CompiledRule>, ParseError> {
    let mut line = raw_line.trim();
    if line.is_empty() {
        return Err(ParseError::Empty);
    }
    if is_comment_line(line) {
        return Err(ParseError::Comment);
    }
    if line.contains("##") || line.contains("#@#") || line.contains("#?#") || line.contains("#$#") {
        return Err(ParseError::Cosmetic);
    }

    let mut action = RuleAction::Block;
    if let Some(rest) = line.strip_prefix("@@") {
        action = RuleAction::Allow;
        line = rest.trim_start();
    }

    let (pattern_part, options_text) = split_rule_options(line);
    let options = match options_text {
        Some(options_text) => parse_options(options_text)?,
        None => ParsedOptions::default(),
    };

    let pattern_str = pattern_part.trim();
    let rule = CompiledRule {
        action: if options.redirect && action == RuleAction::Block {
            RuleAction::Redirect
        } else {
            action
        },
        important: options.important,
    };

    if is_host_anchor_rule(pattern_str) {
        return Ok(vec![rule]);
    }

    if let Some(hosts) = count_hosts_file_domains(pattern_str)? {
        return Ok(vec![rule; hosts]);
    }

    validate_pattern_rule(pattern_str)?;
    Ok(vec![rule])
}

/// Compile every line of a filter list, skipping lines that do not compile.
pub fn parse_filter_list(text: &str) -> Vec<(String, Vec<CompiledRule>)> {
    let mut compiled = Vec::new();

    for raw_line in text.lines() {
        match parse_filter(raw_line) {
            Ok(rules) => compiled.push((raw_line.trim().to_string(), rules)),
            Err(ParseError::Empty | ParseError::Comment) => {}
            Err(err) => log::debug!("Skipping {:?}: {}", raw_line.trim(), err),
        }
    }

    compiled
}

#[derive(Debug, Clone, Copy, Default)]
struct ParsedOptions {
    important: bool,
    redirect: bool,
}

fn split_rule_options(line: &str) -> (&str, Option<&str>) {
    match line.find('$') {
        Some(pos) => (&line[..pos], Some(&line[pos + 1..])),
        None => (line, None),
    }
}

fn parse_options(text: &str) -> Result<ParsedOptions, ParseError> {
    let mut important = false;
    let mut redirect = false;
    let mut type_include = 0u32;
    let mut type_exclude = 0u32;
    let mut party_include = 0u8;
    let mut party_exclude = 0u8;
    let mut scheme_include = 0u8;
    let mut scheme_exclude = 0u8;

    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(ParsedOptions::default());
    }

    for raw in trimmed.split(',') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }

        let raw_lower = raw.to_ascii_lowercase();
        let raw_lower = raw_lower.as_str();

        if raw_lower == "important" {
            important = true;
            continue;
        }

        if raw_lower == "match-case" || raw_lower == "match_case" {
            continue;
        }

        if let Some(domain_value) = raw_lower.strip_prefix("domain=") {
            validate_domain_option(domain_value)?;
            continue;
        }

        if let Some(redirect_value) = raw_lower
            .strip_prefix("redirect=")
            .or_else(|| raw_lower.strip_prefix("redirect-rule="))
        {
            if redirect_value.is_empty() {
                return Err(ParseError::UnsupportedOption(raw.to_string()));
            }
            redirect = true;
            continue;
        }

        let (negated, name) = match raw_lower.strip_prefix('~') {
            Some(rest) => (true, rest),
            None => (false, raw_lower),
        };

        if name.is_empty() || name.contains('=') || name == "badfilter" {
            return Err(ParseError::UnsupportedOption(raw.to_string()));
        }

        if let Some(mask) = request_type_mask(name) {
            if negated {
                type_exclude |= mask;
            } else {
                type_include |= mask;
            }
            continue;
        }

        if let Some(mask) = party_mask(name) {
            if negated {
                party_exclude |= mask;
            } else {
                party_include |= mask;
            }
            continue;
        }

        if let Some(mask) = scheme_mask(name) {
            if negated {
                scheme_exclude |= mask;
            } else {
                scheme_include |= mask;
            }
            continue;
        }

        return Err(ParseError::UnsupportedOption(raw.to_string()));
    }

    let matches_anything = mask_matches_anything(type_include, type_exclude, RequestType::ALL.bits())
        && mask_matches_anything(party_include.into(), party_exclude.into(), PartyMask::ALL.bits().into())
        && mask_matches_anything(scheme_include.into(), scheme_exclude.into(), SchemeMask::ALL.bits().into());
    if !matches_anything {
        return Err(ParseError::EmptyMask(trimmed.to_string()));
    }

    Ok(ParsedOptions { important, redirect })
}

/// Every entry of a `domain=` list must be a valid, possibly negated, domain.
fn validate_domain_option(value: &str) -> Result<(), ParseError> {
    let mut entries = 0;

    for raw in value.split('|') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let domain = raw.strip_prefix('~').unwrap_or(raw);
        if !is_valid_domain(domain) {
            return Err(ParseError::InvalidDomain(domain.to_string()));
        }
        entries += 1;
    }

    if entries == 0 {
        return Err(ParseError::InvalidDomain(value.to_string()));
    }
    Ok(())
}

/// Whether include/exclude bits leave anything to match. No include bits
/// means "all".
fn mask_matches_anything(include: u32, exclude: u32, all: u32) -> bool {
    let include = include & all;
    let exclude = exclude & all;
    let mask = if include != 0 { include & !exclude } else { all & !exclude };
    mask != 0
}

fn request_type_mask(name: &str) -> Option<u32> {
    match name {
        "script" => Some(RequestType::SCRIPT.bits()),
        "image" => Some(RequestType::IMAGE.bits()),
        "stylesheet" | "css" => Some(RequestType::STYLESHEET.bits()),
        "object" => Some(RequestType::OBJECT.bits()),
        "subdocument" | "frame" => Some(RequestType::SUBDOCUMENT.bits()),
        "document" | "doc" | "main_frame" => Some(RequestType::MAIN_FRAME.bits()),
        "xmlhttprequest" | "xhr" => Some(RequestType::XMLHTTPREQUEST.bits()),
        "media" => Some(RequestType::MEDIA.bits()),
        "font" => Some(RequestType::FONT.bits()),
        "ping" => Some(RequestType::PING.bits()),
        "websocket" => Some(RequestType::WEBSOCKET.bits()),
        "beacon" => Some(RequestType::BEACON.bits()),
        "fetch" => Some(RequestType::FETCH.bits()),
        "csp_report" => Some(RequestType::CSP_REPORT.bits()),
        "other" => Some(RequestType::OTHER.bits()),
        _ => None,
    }
}

fn party_mask(name: &str) -> Option<u8> {
    match name {
        "third-party" | "thirdparty" | "3p" => Some(PartyMask::THIRD_PARTY.bits()),
        "first-party" | "firstparty" | "1p" => Some(PartyMask::FIRST_PARTY.bits()),
        _ => None,
    }
}

fn scheme_mask(name: &str) -> Option<u8> {
    match name {
        "http" => Some(SchemeMask::HTTP.bits()),
        "https" => Some(SchemeMask::HTTPS.bits()),
        "ws" => Some(SchemeMask::WS.bits()),
        "wss" => Some(SchemeMask::WSS.bits()),
        "data" => Some(SchemeMask::DATA.bits()),
        "ftp" => Some(SchemeMask::FTP.bits()),
        _ => None,
    }
}

fn is_comment_line(line: &str) -> bool {
    line.starts_with('!') || line.starts_with('[') || (line.starts_with('#') && !line.starts_with("##"))
}

fn is_host_anchor_rule(line: &str) -> bool {
    let Some(rest) = line.strip_prefix("||") else {
        return false;
    };
    let rest = rest.strip_prefix('.').unwrap_or(rest);

    let mut end = rest.len();
    for (i, ch) in rest.char_indices() {
        if ch == '^' || ch == '|' {
            end = i;
            break;
        }
        if ch == '/' || ch == '?' || ch == '#' || ch == ':' || ch == '*' {
            return false;
        }
    }

    // Only a bare separator may follow the host.
    matches!(&rest[end..], "" | "^" | "^|" | "|") && is_valid_domain(&rest[..end])
}

/// Number of hosts on a hosts-file line, or `None` if the line does not start
/// with an IP address.
fn count_hosts_file_domains(line: &str) -> Result<Option<usize>, ParseError> {
    let mut parts = line.split_whitespace();
    let Some(first) = parts.next() else {
        return Ok(None);
    };
    if first.parse::<IpAddr>().is_err() {
        return Ok(None);
    }

    let mut hosts = 0;
    for host in parts {
        if !is_valid_domain(host) {
            return Err(ParseError::InvalidDomain(host.to_string()));
        }
        hosts += 1;
    }
    if hosts == 0 {
        return Err(ParseError::InvalidPattern(line.to_string()));
    }
    Ok(Some(hosts))
}

fn is_valid_domain(host: &str) -> bool {
    let trimmed = host.trim().trim_matches('.');
    !trimmed.is_empty()
        && trimmed
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'-')
}

fn validate_pattern_rule(line: &str) -> Result<(), ParseError> {
    let line = line.trim();
    if line.is_empty() || line.contains(char::is_whitespace) {
        return Err(ParseError::InvalidPattern(line.to_string()));
    }

    let rest = line
        .strip_prefix("||")
        .or_else(|| line.strip_prefix('|'))
        .unwrap_or(line)
        .trim_end_matches('|');

    if rest.is_empty() || rest.chars().all(|c| c == '*' || c == '^') {
        return Err(ParseError::InvalidPattern(line.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(important: bool) -> CompiledRule {
        CompiledRule {
            action: RuleAction::Block,
            important,
        }
    }

    #[test]
    fn parses_host_anchor_rules() {
        assert_eq!(parse_filter("||Ads.Example.com^").unwrap(), vec![block(false)]);
        assert_eq!(parse_filter("||ads.example.com^$important").unwrap(), vec![block(true)]);
    }

    #[test]
    fn parses_exceptions_and_options() {
        let rules = parse_filter("@@||cdn.example.com^$script,third-party,domain=site.com|~shop.site.com").unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].action, RuleAction::Allow);
        assert!(!rules[0].important);

        assert!(matches!(
            parse_filter("||a.com^$domain=bad_domain.com"),
            Err(ParseError::InvalidDomain(_))
        ));
        assert!(matches!(parse_filter("||a.com^$domain=|"), Err(ParseError::InvalidDomain(_))));
    }

    #[test]
    fn hosts_lines_produce_one_rule_per_host() {
        let rules = parse_filter("0.0.0.0 ads.example.com tracker.example.net").unwrap();
        assert_eq!(rules, vec![block(false); 2]);
        assert!(matches!(parse_filter("0.0.0.0"), Err(ParseError::InvalidPattern(_))));
        assert!(matches!(parse_filter("0.0.0.0 bad/host"), Err(ParseError::InvalidDomain(_))));
    }

    #[test]
    fn redirect_turns_block_into_redirect() {
        let rules = parse_filter("||ads.example.com/ad.js$script,redirect=noopjs").unwrap();
        assert_eq!(rules[0].action, RuleAction::Redirect);

        // Exceptions stay exceptions.
        let rules = parse_filter("@@||ads.example.com/ad.js$redirect-rule=noopjs").unwrap();
        assert_eq!(rules[0].action, RuleAction::Allow);

        assert!(matches!(parse_filter("||a.com^$redirect="), Err(ParseError::UnsupportedOption(_))));
    }

    #[test]
    fn rejects_what_does_not_compile() {
        assert_eq!(parse_filter("! comment"), Err(ParseError::Comment));
        assert_eq!(parse_filter("   "), Err(ParseError::Empty));
        assert_eq!(parse_filter("example.com##.ad"), Err(ParseError::Cosmetic));
        assert!(matches!(parse_filter("||a.com^$badfilter"), Err(ParseError::UnsupportedOption(_))));
        assert!(matches!(parse_filter("||a.com^$frobnicate"), Err(ParseError::UnsupportedOption(_))));
        assert!(matches!(parse_filter("||a.com^$script,~script"), Err(ParseError::EmptyMask(_))));
        assert!(matches!(parse_filter("||a.com^$~http,~https,~ws,~wss,~data,~ftp"), Err(ParseError::EmptyMask(_))));
        assert!(matches!(parse_filter("*"), Err(ParseError::InvalidPattern(_))));
    }

    #[test]
    fn parses_plain_patterns() {
        assert_eq!(parse_filter("/banner/ads-").unwrap(), vec![block(false)]);
        assert_eq!(parse_filter("|https://example.com/track|$match-case").unwrap(), vec![block(false)]);
        assert!(matches!(parse_filter("/banner/ ads"), Err(ParseError::InvalidPattern(_))));
    }

    #[test]
    fn list_parsing_skips_unusable_lines() {
        let list = "[Adblock Plus 2.0]\n! Title: test\n||a.com^\nexample.com##.ad\n\n||b.com^$script\n";
        let compiled = parse_filter_list(list);
        let texts: Vec<&str> = compiled.iter().map(|(text, _)| text.as_str()).collect();
        assert_eq!(texts, vec!["||a.com^", "||b.com^$script"]);
    }
}
