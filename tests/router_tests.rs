use std::sync::Arc;

use portico::{HandlerResult, Request, Resource, RouteTable, TextResponse};

struct Tagged(&'static str);

impl Resource for Tagged {
    fn render(&self, _req: &Request) -> HandlerResult {
        Ok(TextResponse::new(self.0).shared())
    }
}

fn tag(name: &'static str) -> Arc<dyn Resource> {
    Arc::new(Tagged(name))
}

fn tag_of(resource: &Arc<dyn Resource>) -> &'static str {
    let rendered = resource
        .render(&Default::default())
        .unwrap()
        .render()
        .unwrap();
    match String::from_utf8(rendered.body).unwrap().as_str() {
        "users" => "users",
        "posts" => "posts",
        "literal" => "literal",
        "param" => "param",
        "wide" => "wide",
        "narrow" => "narrow",
        "first" => "first",
        "second" => "second",
        "family" => "family",
        other => panic!("unexpected tag {other}"),
    }
}

#[test]
fn most_specific_route_wins_with_captures() {
    let mut table = RouteTable::new(true);
    table.register("/users/{id}", tag("users"), false, None).unwrap();
    table
        .register("/users/{id}/posts/{pid}", tag("posts"), false, None)
        .unwrap();

    let matched = table.resolve("/users/42/posts/7").expect("route expected");
    assert_eq!(tag_of(&matched.resource), "posts");
    let captures: Vec<(&str, &str)> = matched
        .captures
        .iter()
        .map(|(k, v)| (k.as_ref(), v.as_str()))
        .collect();
    assert_eq!(captures, vec![("id", "42"), ("pid", "7")]);

    let matched = table.resolve("/users/42").expect("route expected");
    assert_eq!(tag_of(&matched.resource), "users");
}

#[test]
fn exact_lookup_beats_pattern_scan() {
    let mut table = RouteTable::new(true);
    table.register("/a/b", tag("literal"), false, None).unwrap();
    table.register("/a/{x}", tag("param"), false, None).unwrap();

    let matched = table.resolve("/a/b").expect("route expected");
    assert_eq!(tag_of(&matched.resource), "literal");
    assert!(matched.captures.is_empty());

    let matched = table.resolve("/a/z").expect("route expected");
    assert_eq!(tag_of(&matched.resource), "param");
}

#[test]
fn total_size_breaks_equal_piece_counts() {
    let mut table = RouteTable::new(true);
    table.register("/x/{a}", tag("narrow"), false, None).unwrap();
    table.register("/x/{aa}", tag("wide"), false, None).unwrap();

    // Both have two pieces; "/x/{aa}" is longer, so it wins regardless of
    // registration order.
    let matched = table.resolve("/x/anything").expect("route expected");
    assert_eq!(tag_of(&matched.resource), "wide");
}

#[test]
fn insertion_order_breaks_full_ties() {
    let mut table = RouteTable::new(true);
    table.register("/y/{a}", tag("first"), false, None).unwrap();
    table.register("/y/{b}", tag("second"), false, None).unwrap();

    let matched = table.resolve("/y/z").expect("route expected");
    assert_eq!(tag_of(&matched.resource), "first");
}

#[test]
fn family_route_claims_subtree_but_loses_to_deeper_patterns() {
    let mut table = RouteTable::new(true);
    table.register("/static", tag("family"), true, None).unwrap();
    table
        .register("/static/special/{name}", tag("param"), false, None)
        .unwrap();

    let matched = table.resolve("/static/css/site.css").expect("route expected");
    assert_eq!(tag_of(&matched.resource), "family");

    let matched = table.resolve("/static/special/logo").expect("route expected");
    assert_eq!(tag_of(&matched.resource), "param");
}

#[test]
fn unregister_removes_route() {
    let mut table = RouteTable::new(true);
    table.register("/gone/{id}", tag("param"), false, None).unwrap();
    assert!(table.resolve("/gone/1").is_some());

    table.unregister("/gone/{id}");
    assert!(table.resolve("/gone/1").is_none());
    assert!(table.is_empty());
}

#[test]
fn reregistering_replaces_in_place() {
    let mut table = RouteTable::new(true);
    table.register("/spot", tag("first"), false, None).unwrap();
    table.register("/spot", tag("second"), false, None).unwrap();

    assert_eq!(table.len(), 1);
    let matched = table.resolve("/spot").expect("route expected");
    assert_eq!(tag_of(&matched.resource), "second");
}

#[test]
fn regex_checking_disabled_means_exact_only() {
    let mut table = RouteTable::new(false);
    table.register("/users/{id}", tag("users"), false, None).unwrap();

    assert!(table.resolve("/users/42").is_none());
    assert!(table.resolve("/users/{id}").is_some());
}

#[test]
fn regex_segments_participate_in_matching() {
    let mut table = RouteTable::new(true);
    table
        .register("/items/[0-9]+", tag("narrow"), false, None)
        .unwrap();

    assert!(table.resolve("/items/123").is_some());
    assert!(table.resolve("/items/abc").is_none());
}

#[test]
fn not_acceptable_override_propagates_at_register_time() {
    let override_resource = tag("first");
    let mut table = RouteTable::new(true);
    table
        .register(
            "/with/override",
            tag("second"),
            false,
            Some(override_resource.clone()),
        )
        .unwrap();
    table.register("/without", tag("second"), false, None).unwrap();

    let matched = table.resolve("/with/override").expect("route expected");
    let inherited = matched.not_acceptable.expect("override expected");
    assert!(Arc::ptr_eq(&inherited, &override_resource));

    let matched = table.resolve("/without").expect("route expected");
    assert!(matched.not_acceptable.is_none());
}
