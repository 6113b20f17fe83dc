//! Reader for scripts written by [`super::emit`].
//!
//! Accepts exactly the grammar the emitter produces, so that reading a
//! generated ruleset back and emitting it again is the identity. Anything
//! else is rejected with the offending line.

use std::net::IpAddr;

use ipnetwork::IpNetwork;
use thiserror::Error;

use super::{
    BaseHook, Chain, ChainType, Expr, Family, Hook, IpFamily, Match, MatchKey, MatchValue,
    NatStmt, NftRule, Policy, RejectKind, Ruleset, Set, SetType, Table, Transport, Value,
    Verdict,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("nft script line {line}: {message}")]
pub struct ScriptError {
    pub line: usize,
    pub message: String,
}

impl ScriptError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// Parse a complete script into a ruleset.
pub fn parse(text: &str) -> Result<Ruleset, ScriptError> {
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'));

    let mut table: Option<Table> = None;
    let mut last_line = 0;
    while let Some((number, line)) = lines.next() {
        last_line = number;
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            ["delete", "table", family, _] | ["table", family, _] if table.is_none() => {
                parse_family(family, number)?;
            }
            ["table", family, name, "{"] if table.is_none() => {
                let mut body = Table {
                    family: parse_family(family, number)?,
                    name: (*name).to_string(),
                    sets: Vec::new(),
                    chains: Vec::new(),
                };
                read_table(&mut lines, &mut body, number)?;
                table = Some(body);
            }
            _ => return Err(ScriptError::new(number, format!("unexpected '{line}'"))),
        }
    }

    table
        .map(|table| Ruleset { table })
        .ok_or_else(|| ScriptError::new(last_line, "script defines no table"))
}

fn parse_family(raw: &str, line: usize) -> Result<Family, ScriptError> {
    Family::parse(raw).ok_or_else(|| ScriptError::new(line, format!("unknown family '{raw}'")))
}

fn read_table<'a>(
    lines: &mut impl Iterator<Item = (usize, &'a str)>,
    table: &mut Table,
    opened: usize,
) -> Result<(), ScriptError> {
    while let Some((number, line)) = lines.next() {
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            ["}"] => return Ok(()),
            ["set", name, "{"] => {
                let set = read_set(lines, name, number)?;
                table.sets.push(set);
            }
            ["chain", name, "{"] => {
                let chain = read_chain(lines, name, number)?;
                table.chains.push(chain);
            }
            _ => return Err(ScriptError::new(number, format!("unexpected '{line}' in table"))),
        }
    }
    Err(ScriptError::new(opened, "table is not closed"))
}

fn read_set<'a>(
    lines: &mut impl Iterator<Item = (usize, &'a str)>,
    name: &str,
    opened: usize,
) -> Result<Set, ScriptError> {
    let mut kind = None;
    let mut elements = Vec::new();
    for (number, line) in lines.by_ref() {
        if line == "}" {
            let kind =
                kind.ok_or_else(|| ScriptError::new(opened, format!("set {name} has no type")))?;
            return Ok(Set {
                name: name.to_string(),
                kind,
                elements,
            });
        }
        if line == "flags interval" || line == "auto-merge" {
            continue;
        }
        if let Some(raw) = line.strip_prefix("type ") {
            kind = Some(
                SetType::parse(raw.trim())
                    .ok_or_else(|| ScriptError::new(number, format!("unknown set type '{raw}'")))?,
            );
            continue;
        }
        if let Some(raw) = line.strip_prefix("elements = ") {
            let Some(set_kind) = kind else {
                return Err(ScriptError::new(number, "elements before set type"));
            };
            let key = match set_kind {
                SetType::Ipv4Addr => MatchKey::IpSaddr,
                SetType::Ipv6Addr => MatchKey::Ip6Saddr,
                SetType::InetService => MatchKey::Dport(Transport::Th),
            };
            let mut cursor = Cursor::new(tokenize(raw, number)?, number);
            elements = match cursor.value(key)? {
                MatchValue::Set(values) => values,
                _ => return Err(ScriptError::new(number, "set elements must be braced")),
            };
            cursor.finish()?;
            continue;
        }
        return Err(ScriptError::new(number, format!("unexpected '{line}' in set {name}")));
    }
    Err(ScriptError::new(opened, format!("set {name} is not closed")))
}

fn read_chain<'a>(
    lines: &mut impl Iterator<Item = (usize, &'a str)>,
    name: &str,
    opened: usize,
) -> Result<Chain, ScriptError> {
    let mut chain = Chain::regular(name);
    for (number, line) in lines.by_ref() {
        if line == "}" {
            return Ok(chain);
        }
        if line.starts_with("type ") {
            if chain.hook.is_some() || !chain.rules.is_empty() {
                return Err(ScriptError::new(number, "chain type must come first"));
            }
            chain.hook = Some(parse_hook(line, number)?);
            continue;
        }
        chain.rules.push(parse_rule(line, number)?);
    }
    Err(ScriptError::new(opened, format!("chain {name} is not closed")))
}

fn parse_hook(line: &str, number: usize) -> Result<BaseHook, ScriptError> {
    let mut parts = line.split(';').map(str::trim).filter(|part| !part.is_empty());
    let head: Vec<&str> = parts.next().unwrap_or_default().split_whitespace().collect();
    let ["type", kind, "hook", hook, "priority", priority] = head.as_slice() else {
        return Err(ScriptError::new(number, format!("malformed chain type '{line}'")));
    };
    let kind = match *kind {
        "filter" => ChainType::Filter,
        "nat" => ChainType::Nat,
        other => return Err(ScriptError::new(number, format!("unknown chain type '{other}'"))),
    };
    let hook = Hook::parse(hook)
        .ok_or_else(|| ScriptError::new(number, format!("unknown hook '{hook}'")))?;
    let priority = priority
        .parse()
        .map_err(|_| ScriptError::new(number, format!("invalid priority '{priority}'")))?;
    let policy = match parts.next() {
        None => None,
        Some("policy accept") => Some(Policy::Accept),
        Some("policy drop") => Some(Policy::Drop),
        Some(other) => return Err(ScriptError::new(number, format!("unexpected '{other}'"))),
    };
    if let Some(extra) = parts.next() {
        return Err(ScriptError::new(number, format!("unexpected '{extra}'")));
    }
    Ok(BaseHook {
        kind,
        hook,
        priority,
        policy,
    })
}

/// Parse one rule line.
pub fn parse_rule(line: &str, number: usize) -> Result<NftRule, ScriptError> {
    let mut cursor = Cursor::new(tokenize(line, number)?, number);
    let mut rule = NftRule::new(Vec::new());
    while let Some(word) = cursor.peek_word() {
        let word = word.to_string();
        if word == "comment" {
            cursor.advance();
            rule.comment = Some(cursor.quoted()?);
            cursor.finish()?;
            break;
        }
        let expr = cursor.expr(&word)?;
        rule.exprs.push(expr);
    }
    cursor.finish()?;
    if rule.exprs.is_empty() {
        return Err(ScriptError::new(number, "empty rule"));
    }
    Ok(rule)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Quoted(String),
    Open,
    Close,
    Comma,
}

/// Split a line into words, quoted strings and set punctuation. Commas
/// only separate tokens inside braces (`ct state established,related`).
fn tokenize(line: &str, number: usize) -> Result<Vec<Token>, ScriptError> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();
    let mut depth = 0usize;
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '"' => {
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some(c) => text.push(c),
                        None => return Err(ScriptError::new(number, "unterminated string")),
                    }
                }
                tokens.push(Token::Quoted(text));
            }
            '{' => {
                chars.next();
                depth += 1;
                tokens.push(Token::Open);
            }
            '}' => {
                chars.next();
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| ScriptError::new(number, "unbalanced '}'"))?;
                tokens.push(Token::Close);
            }
            ',' if depth > 0 => {
                chars.next();
                tokens.push(Token::Comma);
            }
            _ => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || matches!(c, '{' | '}' | '"') || (c == ',' && depth > 0)
                    {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                tokens.push(Token::Word(word));
            }
        }
    }
    if depth != 0 {
        return Err(ScriptError::new(number, "unbalanced '{'"));
    }
    Ok(tokens)
}

struct Cursor {
    tokens: Vec<Token>,
    pos: usize,
    line: usize,
}

impl Cursor {
    fn new(tokens: Vec<Token>, line: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            line,
        }
    }

    fn error(&self, message: impl Into<String>) -> ScriptError {
        ScriptError::new(self.line, message)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_word(&self) -> Option<&str> {
        match self.peek() {
            Some(Token::Word(word)) => Some(word),
            _ => None,
        }
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn word(&mut self) -> Result<String, ScriptError> {
        match self.tokens.get(self.pos).cloned() {
            Some(Token::Word(word)) => {
                self.pos += 1;
                Ok(word)
            }
            other => Err(self.error(format!("expected a word, found {other:?}"))),
        }
    }

    fn expect(&mut self, expected: &str) -> Result<(), ScriptError> {
        let word = self.word()?;
        if word == expected {
            Ok(())
        } else {
            Err(self.error(format!("expected '{expected}', found '{word}'")))
        }
    }

    fn eat(&mut self, expected: &str) -> bool {
        if self.peek_word() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn quoted(&mut self) -> Result<String, ScriptError> {
        match self.tokens.get(self.pos).cloned() {
            Some(Token::Quoted(text)) => {
                self.pos += 1;
                Ok(text)
            }
            other => Err(self.error(format!("expected a quoted string, found {other:?}"))),
        }
    }

    fn finish(&self) -> Result<(), ScriptError> {
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(self.error(format!("unexpected trailing {token:?}"))),
        }
    }

    fn expr(&mut self, word: &str) -> Result<Expr, ScriptError> {
        match word {
            "log" => {
                self.advance();
                self.expect("prefix")?;
                Ok(Expr::Log {
                    prefix: self.quoted()?,
                })
            }
            "dnat" | "snat" => {
                self.advance();
                let family = match self.word()?.as_str() {
                    "ip" => IpFamily::Ip,
                    "ip6" => IpFamily::Ip6,
                    other => return Err(self.error(format!("unknown NAT family '{other}'"))),
                };
                self.expect("to")?;
                let target = self.word()?;
                if word == "snat" {
                    let addr = self.addr(&target)?;
                    let random = self.eat("random");
                    return Ok(Expr::Nat(NatStmt::Snat {
                        family,
                        addr,
                        random,
                    }));
                }
                let (addr, port) = self.nat_target(family, &target)?;
                Ok(Expr::Nat(NatStmt::Dnat { family, addr, port }))
            }
            "masquerade" => {
                self.advance();
                let random = self.eat("random");
                Ok(Expr::Nat(NatStmt::Masquerade { random }))
            }
            "accept" | "drop" | "return" => {
                self.advance();
                Ok(Expr::Verdict(match word {
                    "accept" => Verdict::Accept,
                    "drop" => Verdict::Drop,
                    _ => Verdict::Return,
                }))
            }
            "reject" => {
                self.advance();
                if self.eat("with") {
                    self.expect("tcp")?;
                    self.expect("reset")?;
                    return Ok(Expr::Verdict(Verdict::Reject(RejectKind::TcpReset)));
                }
                Ok(Expr::Verdict(Verdict::Reject(RejectKind::Default)))
            }
            "jump" | "goto" => {
                self.advance();
                let target = self.word()?;
                Ok(Expr::Verdict(if word == "jump" {
                    Verdict::Jump(target)
                } else {
                    Verdict::Goto(target)
                }))
            }
            _ => self.matcher().map(Expr::Match),
        }
    }

    fn matcher(&mut self) -> Result<Match, ScriptError> {
        let first = self.word()?;
        let key = match first.as_str() {
            "iifname" => MatchKey::IifName,
            "oifname" => MatchKey::OifName,
            "meta" => match self.word()?.as_str() {
                "nfproto" => MatchKey::NfProto,
                "l4proto" => MatchKey::L4Proto,
                other => return Err(self.error(format!("unknown meta key '{other}'"))),
            },
            "ip" | "ip6" => {
                let v6 = first == "ip6";
                match (self.word()?.as_str(), v6) {
                    ("saddr", false) => MatchKey::IpSaddr,
                    ("daddr", false) => MatchKey::IpDaddr,
                    ("saddr", true) => MatchKey::Ip6Saddr,
                    ("daddr", true) => MatchKey::Ip6Daddr,
                    (other, _) => return Err(self.error(format!("unknown {first} key '{other}'"))),
                }
            }
            "tcp" | "udp" | "th" => {
                let transport = match first.as_str() {
                    "tcp" => Transport::Tcp,
                    "udp" => Transport::Udp,
                    _ => Transport::Th,
                };
                match self.word()?.as_str() {
                    "sport" => MatchKey::Sport(transport),
                    "dport" => MatchKey::Dport(transport),
                    other => return Err(self.error(format!("unknown {first} key '{other}'"))),
                }
            }
            "icmp" => {
                self.expect("type")?;
                MatchKey::IcmpType
            }
            "icmpv6" => {
                self.expect("type")?;
                MatchKey::Icmpv6Type
            }
            "ct" => match self.word()?.as_str() {
                "state" => MatchKey::CtState,
                "status" => MatchKey::CtStatus,
                other => return Err(self.error(format!("unknown ct key '{other}'"))),
            },
            "fib" => {
                self.expect("daddr")?;
                self.expect("type")?;
                MatchKey::FibDaddrType
            }
            other => return Err(self.error(format!("unknown expression '{other}'"))),
        };
        let negate = self.eat("!=");
        let value = self.value(key)?;
        Ok(Match { key, negate, value })
    }

    fn value(&mut self, key: MatchKey) -> Result<MatchValue, ScriptError> {
        match self.tokens.get(self.pos).cloned() {
            Some(Token::Open) => {
                self.advance();
                let mut values = Vec::new();
                loop {
                    values.push(self.element(key)?);
                    match self.tokens.get(self.pos) {
                        Some(Token::Comma) => self.advance(),
                        Some(Token::Close) => {
                            self.advance();
                            break;
                        }
                        other => return Err(self.error(format!("expected ',' or '}}', found {other:?}"))),
                    }
                }
                Ok(MatchValue::Set(values))
            }
            Some(Token::Word(word)) if word.starts_with('@') => {
                self.advance();
                Ok(MatchValue::Named(word[1..].to_string()))
            }
            _ => self.element(key).map(MatchValue::One),
        }
    }

    fn element(&mut self, key: MatchKey) -> Result<Value, ScriptError> {
        if matches!(key, MatchKey::IifName | MatchKey::OifName) {
            return self.quoted().map(Value::Name);
        }
        let word = self.word()?;
        if key.is_address() {
            if let Some((start, end)) = word.split_once('-') {
                return Ok(Value::AddrRange(self.addr(start)?, self.addr(end)?));
            }
            return word
                .parse::<IpNetwork>()
                .map(Value::Net)
                .map_err(|_| self.error(format!("invalid address '{word}'")));
        }
        if key.is_port() {
            let port = |raw: &str| {
                raw.parse::<u16>()
                    .map_err(|_| self.error(format!("invalid port '{word}'")))
            };
            if let Some((start, end)) = word.split_once('-') {
                return Ok(Value::PortRange(port(start)?, port(end)?));
            }
            return port(&word).map(Value::Port);
        }
        Ok(Value::Symbol(word))
    }

    fn addr(&self, raw: &str) -> Result<IpAddr, ScriptError> {
        raw.parse()
            .map_err(|_| self.error(format!("invalid address '{raw}'")))
    }

    /// `a.b.c.d[:port]` or `[v6]:port` / bare v6.
    fn nat_target(&self, family: IpFamily, raw: &str) -> Result<(IpAddr, Option<u16>), ScriptError> {
        let port = |raw: &str| {
            raw.parse::<u16>()
                .map_err(|_| self.error(format!("invalid port '{raw}'")))
        };
        match family {
            IpFamily::Ip => match raw.split_once(':') {
                Some((addr, p)) => Ok((self.addr(addr)?, Some(port(p)?))),
                None => Ok((self.addr(raw)?, None)),
            },
            IpFamily::Ip6 => match raw.strip_prefix('[').and_then(|rest| rest.split_once("]:")) {
                Some((addr, p)) => Ok((self.addr(addr)?, Some(port(p)?))),
                None => Ok((self.addr(raw)?, None)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{parse, parse_rule};
    use crate::nft::emit::{emit, render_rule};
    use crate::nft::{Expr, MatchKey, MatchValue, NatStmt, Value, Verdict};

    const SCRIPT: &str = "#!/usr/sbin/nft -f
# Generated by patronus-convert; edits are overwritten.

table inet patronus
delete table inet patronus

table inet patronus {
\tset web_v4 {
\t\ttype ipv4_addr
\t\tflags interval
\t\tauto-merge
\t\telements = { 10.0.0.0/24, 192.168.1.5-192.168.1.9 }
\t}

\tset web_ports {
\t\ttype inet_service
\t\tflags interval
\t\tauto-merge
\t\telements = { 80, 8000-8080 }
\t}

\tchain input {
\t\ttype filter hook input priority 0; policy drop;
\t\tct state established,related accept
\t\tct state invalid drop
\t\tjump filter_in
\t\taccept
\t}

\tchain filter_in {
\t\tiifname { \"em0\", \"tun*\" } meta l4proto { tcp, udp } ip daddr @web_v4 th dport @web_ports return comment \"filter[0] web\"
\t\tmeta nfproto ipv6 meta l4proto ipv6-icmp icmpv6 type { echo-request, nd-neighbor-solicit } return
\t\tiifname \"em1\" goto in_lan
\t\tdrop
\t}

\tchain nat_prerouting {
\t\ttype nat hook prerouting priority -100;
\t\tiifname \"em0\" meta l4proto tcp ip daddr 198.51.100.1 tcp dport 443 dnat ip to 10.0.0.5:8443
\t\tiifname \"em0\" ip6 daddr 2001:db8::1 dnat ip6 to [fd00::5]:80
\t}

\tchain nat_postrouting {
\t\ttype nat hook postrouting priority 100;
\t\toifname \"em0\" ip saddr != 10.0.0.0/8 masquerade random
\t}
}
";

    #[test]
    fn reads_back_emitted_script() {
        let ruleset = parse(SCRIPT).expect("parse");
        assert_eq!(ruleset.table.name, "patronus");
        assert_eq!(ruleset.table.sets.len(), 2);
        assert_eq!(ruleset.table.chains.len(), 4);
        assert_eq!(emit(&ruleset), SCRIPT);
    }

    #[test]
    fn ct_state_list_stays_one_symbol() {
        let rule = parse_rule("ct state established,related accept", 1).expect("rule");
        let m = rule.matches().next().expect("match");
        assert_eq!(m.key, MatchKey::CtState);
        assert_eq!(
            m.value,
            MatchValue::One(Value::Symbol("established,related".to_string()))
        );
        assert_eq!(rule.verdict(), Some(&Verdict::Accept));
    }

    #[test]
    fn nat_targets_parse_per_family() {
        let rule = parse_rule("dnat ip6 to [fd00::5]:80", 1).expect("rule");
        assert!(matches!(
            rule.exprs[0],
            Expr::Nat(NatStmt::Dnat { port: Some(80), .. })
        ));
        let rule = parse_rule("snat ip to 198.51.100.7 random", 1).expect("rule");
        assert_eq!(render_rule(&rule), "snat ip to 198.51.100.7 random");
    }

    #[test]
    fn rejects_unknown_grammar_with_line() {
        let err = parse("table inet t {\n\tchain c {\n\t\tmeta mark 1 accept\n\t}\n}\n")
            .expect_err("must fail");
        assert_eq!(err.line, 3);

        let err = parse("table inet t {\n\tchain c {\n").expect_err("must fail");
        assert!(err.message.contains("not closed"));

        let err = parse("# nothing\n").expect_err("must fail");
        assert!(err.message.contains("no table"));
    }
}
