//! `nft -j` JSON rendering of the ruleset.

use serde_json::{json, Value as Json};

use super::{
    is_host, Chain, Expr, Match, MatchKey, MatchValue, NatStmt, NftRule, Policy, RejectKind,
    Ruleset, Set, Table, Value, Verdict,
};

/// Render the ruleset as one `nft -j -f` batch that atomically replaces
/// the table, in the same order as the text script.
pub fn to_json(ruleset: &Ruleset) -> Json {
    let table = &ruleset.table;
    let head = json!({ "family": table.family.as_str(), "name": table.name });
    let mut commands = vec![
        json!({ "add": { "table": head } }),
        json!({ "delete": { "table": head } }),
        json!({ "add": { "table": head } }),
    ];
    for set in &table.sets {
        commands.push(set_add(table, set));
    }
    for chain in &table.chains {
        commands.push(chain_add(table, chain));
    }
    for chain in &table.chains {
        for rule in &chain.rules {
            commands.push(rule_add(table, &chain.name, rule));
        }
    }
    json!({ "nftables": commands })
}

fn set_add(table: &Table, set: &Set) -> Json {
    let mut body = json!({
        "family": table.family.as_str(),
        "table": table.name,
        "name": set.name,
        "type": set.kind.as_str(),
        "flags": ["interval"],
        "auto-merge": true,
    });
    if !set.elements.is_empty() {
        body["elem"] = Json::Array(set.elements.iter().map(value).collect());
    }
    json!({ "add": { "set": body } })
}

fn chain_add(table: &Table, chain: &Chain) -> Json {
    let mut body = json!({
        "family": table.family.as_str(),
        "table": table.name,
        "name": chain.name,
    });
    if let Some(hook) = &chain.hook {
        body["type"] = json!(match hook.kind {
            super::ChainType::Filter => "filter",
            super::ChainType::Nat => "nat",
        });
        body["hook"] = json!(hook.hook.as_str());
        body["prio"] = json!(hook.priority);
        if let Some(policy) = hook.policy {
            body["policy"] = json!(match policy {
                Policy::Accept => "accept",
                Policy::Drop => "drop",
            });
        }
    }
    json!({ "add": { "chain": body } })
}

fn rule_add(table: &Table, chain: &str, rule: &NftRule) -> Json {
    let mut body = json!({
        "family": table.family.as_str(),
        "table": table.name,
        "chain": chain,
        "expr": rule.exprs.iter().map(expr).collect::<Vec<_>>(),
    });
    if let Some(comment) = &rule.comment {
        body["comment"] = json!(comment);
    }
    json!({ "add": { "rule": body } })
}

fn expr(expr: &Expr) -> Json {
    match expr {
        Expr::Match(m) => matcher(m),
        Expr::Log { prefix } => json!({ "log": { "prefix": prefix } }),
        Expr::Nat(NatStmt::Dnat { family, addr, port }) => {
            let mut body = json!({ "family": family.as_str(), "addr": addr.to_string() });
            if let Some(port) = port {
                body["port"] = json!(port);
            }
            json!({ "dnat": body })
        }
        Expr::Nat(NatStmt::Snat {
            family,
            addr,
            random,
        }) => {
            let mut body = json!({ "family": family.as_str(), "addr": addr.to_string() });
            if *random {
                body["flags"] = json!(["random"]);
            }
            json!({ "snat": body })
        }
        Expr::Nat(NatStmt::Masquerade { random: true }) => {
            json!({ "masquerade": { "flags": ["random"] } })
        }
        Expr::Nat(NatStmt::Masquerade { random: false }) => json!({ "masquerade": null }),
        Expr::Verdict(verdict) => match verdict {
            Verdict::Accept => json!({ "accept": null }),
            Verdict::Drop => json!({ "drop": null }),
            Verdict::Reject(RejectKind::Default) => json!({ "reject": null }),
            Verdict::Reject(RejectKind::TcpReset) => json!({ "reject": { "type": "tcp reset" } }),
            Verdict::Return => json!({ "return": null }),
            Verdict::Jump(target) => json!({ "jump": { "target": target } }),
            Verdict::Goto(target) => json!({ "goto": { "target": target } }),
        },
    }
}

fn matcher(m: &Match) -> Json {
    let right = match (&m.value, m.key) {
        // ct state and status are flag lists, not sets.
        (MatchValue::One(Value::Symbol(flags)), MatchKey::CtState | MatchKey::CtStatus) => {
            json!(flags.split(',').collect::<Vec<_>>())
        }
        (MatchValue::One(one), _) => value(one),
        (MatchValue::Set(values), _) => json!({ "set": values.iter().map(value).collect::<Vec<_>>() }),
        (MatchValue::Named(name), _) => json!(format!("@{name}")),
    };
    json!({
        "match": {
            "left": left(m.key),
            "op": if m.negate { "!=" } else { "==" },
            "right": right,
        }
    })
}

fn left(key: MatchKey) -> Json {
    let payload = |protocol: &str, field: &str| json!({ "payload": { "protocol": protocol, "field": field } });
    match key {
        MatchKey::IifName => json!({ "meta": { "key": "iifname" } }),
        MatchKey::OifName => json!({ "meta": { "key": "oifname" } }),
        MatchKey::NfProto => json!({ "meta": { "key": "nfproto" } }),
        MatchKey::L4Proto => json!({ "meta": { "key": "l4proto" } }),
        MatchKey::IpSaddr => payload("ip", "saddr"),
        MatchKey::IpDaddr => payload("ip", "daddr"),
        MatchKey::Ip6Saddr => payload("ip6", "saddr"),
        MatchKey::Ip6Daddr => payload("ip6", "daddr"),
        MatchKey::Sport(transport) => payload(transport.as_str(), "sport"),
        MatchKey::Dport(transport) => payload(transport.as_str(), "dport"),
        MatchKey::IcmpType => payload("icmp", "type"),
        MatchKey::Icmpv6Type => payload("icmpv6", "type"),
        MatchKey::CtState => json!({ "ct": { "key": "state" } }),
        MatchKey::CtStatus => json!({ "ct": { "key": "status" } }),
        MatchKey::FibDaddrType => json!({ "fib": { "flags": ["daddr"], "result": "type" } }),
    }
}

fn value(value: &Value) -> Json {
    match value {
        Value::Symbol(symbol) => match symbol.parse::<u8>() {
            Ok(number) => json!(number),
            Err(_) => json!(symbol),
        },
        Value::Name(name) => json!(name),
        Value::Net(net) if is_host(net) => json!(net.ip().to_string()),
        Value::Net(net) => json!({ "prefix": { "addr": net.ip().to_string(), "len": net.prefix() } }),
        Value::AddrRange(start, end) => json!({ "range": [start.to_string(), end.to_string()] }),
        Value::Port(port) => json!(port),
        Value::PortRange(start, end) => json!({ "range": [start, end] }),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::to_json;
    use crate::nft::{
        BaseHook, Chain, ChainType, Expr, Family, Hook, Match, MatchKey, MatchValue, NftRule,
        Policy, Ruleset, Set, SetType, Table, Transport, Value, Verdict,
    };

    #[test]
    fn batch_replaces_table_then_defines_it() {
        let mut rule = NftRule::new(vec![
            Expr::Match(Match::one(MatchKey::IifName, Value::Name("em0".to_string()))),
            Expr::Match(Match::new(
                MatchKey::IpSaddr,
                MatchValue::Named("admins_v4".to_string()),
            )),
            Expr::Match(Match::one(MatchKey::Dport(Transport::Tcp), Value::PortRange(8000, 8080))),
            Expr::Verdict(Verdict::Return),
        ]);
        rule.comment = Some("filter[0]".to_string());
        let ruleset = Ruleset {
            table: Table {
                family: Family::Inet,
                name: "patronus".to_string(),
                sets: vec![Set {
                    name: "admins_v4".to_string(),
                    kind: SetType::Ipv4Addr,
                    elements: vec![Value::Net("10.0.0.0/8".parse().expect("net"))],
                }],
                chains: vec![Chain {
                    name: "input".to_string(),
                    hook: Some(BaseHook {
                        kind: ChainType::Filter,
                        hook: Hook::Input,
                        priority: 0,
                        policy: Some(Policy::Drop),
                    }),
                    rules: vec![rule],
                }],
            },
        };

        let doc = to_json(&ruleset);
        let commands = doc["nftables"].as_array().expect("array");
        assert_eq!(commands.len(), 6);
        assert_eq!(commands[1], json!({ "delete": { "table": { "family": "inet", "name": "patronus" } } }));
        assert_eq!(
            commands[3]["add"]["set"]["elem"],
            json!([{ "prefix": { "addr": "10.0.0.0", "len": 8 } }])
        );
        assert_eq!(commands[4]["add"]["chain"]["policy"], json!("drop"));
        let expr = &commands[5]["add"]["rule"]["expr"];
        assert_eq!(expr[1]["match"]["right"], json!("@admins_v4"));
        assert_eq!(expr[2]["match"]["right"], json!({ "range": [8000, 8080] }));
        assert_eq!(expr[3], json!({ "return": null }));
        assert_eq!(commands[5]["add"]["rule"]["comment"], json!("filter[0]"));
    }

    #[test]
    fn ct_state_lists_are_arrays() {
        let rule = NftRule::new(vec![
            Expr::Match(Match::one(
                MatchKey::CtState,
                Value::Symbol("established,related".to_string()),
            )),
            Expr::Verdict(Verdict::Accept),
        ]);
        let json = super::expr(&rule.exprs[0]);
        assert_eq!(json["match"]["right"], json!(["established", "related"]));
    }
}
