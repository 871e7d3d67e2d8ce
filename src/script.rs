use crate::error::{HandlerFault, ParseFailure};
use crate::handler::{
    Capability, DynamicMatcher, Extractor, HandlerDescriptor, Identity, ScriptParser,
};
use crate::parser::Packet;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeSet;

/// A handler script as written in a `handlers/*.yaml` file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HandlerScript {
    pub name: String,
    // Omitted for purely dynamic handlers.
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub session_cookies: Vec<String>,
    pub dynamic: Option<DynamicRule>,
}

/// The `dynamic:` section of a handler script.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DynamicRule {
    pub cookie_pattern: String,
    pub host_suffix: Option<String>,
}

/// The parser used by the binary: YAML handler scripts.
#[derive(Debug, Default, Clone, Copy)]
pub struct YamlScriptParser;

impl ScriptParser for YamlScriptParser {
    fn parse(&self, id: &str, text: &str) -> Result<HandlerDescriptor, ParseFailure> {
        let script: HandlerScript =
            serde_yaml::from_str(text).map_err(|e| ParseFailure::new(id, e.to_string()))?;

        if script.name.trim().is_empty() {
            return Err(ParseFailure::new(id, "name must not be empty"));
        }
        if script.domains.is_empty() && script.dynamic.is_none() {
            return Err(ParseFailure::new(
                id,
                "handler declares neither domains nor a dynamic rule",
            ));
        }
        if !script.domains.is_empty() && script.session_cookies.is_empty() {
            return Err(ParseFailure::new(
                id,
                "domains are declared but session_cookies is empty",
            ));
        }

        let domains: BTreeSet<String> = script
            .domains
            .iter()
            .map(|d| d.trim().to_ascii_lowercase())
            .filter(|d| !d.is_empty())
            .collect();
        let extractor = Box::new(CookieExtractor {
            cookies: script.session_cookies,
        });

        let capability = match script.dynamic {
            None => Capability::ExactOnly(extractor),
            Some(rule) => {
                let pattern = Regex::new(&rule.cookie_pattern).map_err(|e| {
                    ParseFailure::new(id, format!("invalid cookie_pattern: {}", e))
                })?;
                Capability::ExactAndDynamic {
                    extractor,
                    matcher: Box::new(CookiePatternMatcher {
                        pattern,
                        host_suffix: rule.host_suffix.map(|s| s.to_ascii_lowercase()),
                    }),
                }
            }
        };

        Ok(HandlerDescriptor {
            id: id.to_string(),
            name: script.name,
            domains,
            capability,
        })
    }
}

/// Extracts a fixed set of named session cookies.
/// Declines unless every one of them is present.
pub struct CookieExtractor {
    cookies: Vec<String>,
}

impl Extractor for CookieExtractor {
    fn extract(&self, packet: &Packet) -> Result<Option<Identity>, HandlerFault> {
        if self.cookies.is_empty() {
            return Ok(None);
        }
        let mut identity = Identity::new();
        for name in &self.cookies {
            match packet.cookie(name) {
                Some(value) => {
                    identity.insert(name.clone(), value.to_string());
                }
                None => return Ok(None),
            }
        }
        Ok(Some(identity))
    }
}

/// Matches any request carrying cookies whose name fits a pattern.
pub struct CookiePatternMatcher {
    pattern: Regex,
    host_suffix: Option<String>,
}

impl DynamicMatcher for CookiePatternMatcher {
    fn try_match(&self, packet: &Packet) -> Result<Option<Identity>, HandlerFault> {
        if let Some(suffix) = &self.host_suffix {
            match packet.domain() {
                Some(domain) if domain.ends_with(suffix.as_str()) => {}
                _ => return Ok(None),
            }
        }
        let identity: Identity = packet
            .cookies
            .iter()
            .filter(|(name, _)| self.pattern.is_match(name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        Ok(if identity.is_empty() {
            None
        } else {
            Some(identity)
        })
    }
}

// --- UNIT TESTS ---
#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mock_packet;

    const BANK: &str = "name: Example Bank\n\
        domains: [Bank.Example, www.bank.example]\n\
        session_cookies: [sessionId]\n";
    const WORDPRESS: &str =
        "name: WordPress\ndynamic:\n  cookie_pattern: \"^wordpress_logged_in_\"\n";

    #[test]
    fn test_exact_handler_extracts_session_cookie() {
        // ARRANGE
        let handler = YamlScriptParser.parse("bank.yaml", BANK).unwrap();
        let packet = mock_packet("bank.example", &[("sessionId", "abc123"), ("lang", "en")]);
        // ACT
        let identity = handler.extract(&packet).unwrap();
        // ASSERT
        assert_eq!(handler.id, "bank.yaml");
        assert!(!handler.is_dynamic());
        assert!(handler.domains.contains("bank.example"), "domains are lower-cased");
        let identity = identity.expect("handler should extract");
        assert_eq!(identity.len(), 1);
        assert_eq!(identity["sessionId"], "abc123");
    }

    #[test]
    fn test_exact_handler_declines_without_cookie() {
        let handler = YamlScriptParser.parse("bank.yaml", BANK).unwrap();
        let packet = mock_packet("bank.example", &[("lang", "en")]);
        assert_eq!(handler.extract(&packet).unwrap(), None);
        assert_eq!(handler.try_match(&packet).unwrap(), None);
    }

    #[test]
    fn test_dynamic_handler_matches_cookie_pattern() {
        // ARRANGE
        let handler = YamlScriptParser.parse("wordpress.yaml", WORDPRESS).unwrap();
        let packet = mock_packet(
            "blog.example",
            &[("wordpress_logged_in_9f2c", "admin|123"), ("other", "x")],
        );
        // ACT
        let identity = handler.try_match(&packet).unwrap();
        // ASSERT
        assert!(handler.is_dynamic());
        assert!(handler.domains.is_empty());
        let identity = identity.expect("pattern should match");
        assert_eq!(identity.len(), 1);
        assert_eq!(identity["wordpress_logged_in_9f2c"], "admin|123");
        // Without session cookies the exact path always declines.
        assert_eq!(handler.extract(&packet).unwrap(), None);
    }

    #[test]
    fn test_dynamic_handler_respects_host_suffix() {
        let script = concat!(
            "name: Intranet\n",
            "dynamic:\n",
            "  cookie_pattern: \"^SID$\"\n",
            "  host_suffix: .corp.example\n",
        );
        let handler = YamlScriptParser.parse("intranet.yaml", script).unwrap();
        let inside = mock_packet("wiki.corp.example", &[("SID", "1")]);
        let outside = mock_packet("wiki.example", &[("SID", "1")]);
        assert!(handler.try_match(&inside).unwrap().is_some());
        assert_eq!(handler.try_match(&outside).unwrap(), None);
    }

    #[test]
    fn test_malformed_scripts_are_rejected() {
        let cases = [
            ("broken.yaml", "name: [unterminated"),
            (
                "empty-name.yaml",
                "name: \"  \"\ndomains: [a.example]\nsession_cookies: [s]\n",
            ),
            ("nothing.yaml", "name: Nothing\n"),
            ("no-cookies.yaml", "name: NoCookies\ndomains: [a.example]\n"),
            ("bad-regex.yaml", "name: Bad\ndynamic:\n  cookie_pattern: \"(\"\n"),
            ("typo.yaml", "name: Typo\ndomain: [a.example]\nsession_cookies: [s]\n"),
        ];
        for (id, text) in cases {
            let failure = YamlScriptParser.parse(id, text).unwrap_err();
            assert_eq!(failure.script, id, "failure should name the script");
        }
    }
}
