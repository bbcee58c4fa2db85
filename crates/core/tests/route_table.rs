//! Route table built on OrderedMap
//!
//! Mirrors how an HTTP routing plugin indexes its handlers: each route record
//! embeds a map node, is keyed by its pattern source, and carries a compiled
//! matcher. The map owns nothing; the table frees records itself.

use regex::Regex;
use std::cmp::Ordering;
use std::ptr::NonNull;
use tessel_core::{MapNode, OrderedMap, container_of};

struct Route {
    node: MapNode,
    pattern: String,
    matcher: Regex,
    handler: &'static str,
}

type RouteCmp = fn(NonNull<MapNode>, NonNull<MapNode>) -> Ordering;

fn compare_patterns(a: NonNull<MapNode>, b: NonNull<MapNode>) -> Ordering {
    unsafe {
        let a = container_of!(a, Route, node).as_ref();
        let b = container_of!(b, Route, node).as_ref();
        a.pattern.cmp(&b.pattern)
    }
}

struct RouteTable {
    map: OrderedMap<RouteCmp>,
}

impl RouteTable {
    fn new() -> Self {
        Self {
            map: OrderedMap::new(compare_patterns as RouteCmp),
        }
    }

    fn boxed(pattern: &str, handler: &'static str) -> *mut Route {
        Box::into_raw(Box::new(Route {
            node: MapNode::new(),
            pattern: pattern.to_string(),
            matcher: Regex::new(&format!("^{pattern}$")).unwrap(),
            handler,
        }))
    }

    /// Add a route; false if the pattern is already routed.
    fn add(&mut self, pattern: &str, handler: &'static str) -> bool {
        let raw = Self::boxed(pattern, handler);
        unsafe {
            if self.map.insert(NonNull::new_unchecked(&raw mut (*raw).node)).is_some() {
                drop(Box::from_raw(raw));
                return false;
            }
        }
        true
    }

    /// Route `pattern` to `handler`, returning the handler it displaced.
    fn set(&mut self, pattern: &str, handler: &'static str) -> Option<&'static str> {
        let raw = Self::boxed(pattern, handler);
        unsafe {
            let old = self.map.replace(NonNull::new_unchecked(&raw mut (*raw).node))?;
            let old = Box::from_raw(container_of!(old, Route, node).as_ptr());
            Some(old.handler)
        }
    }

    fn get(&self, pattern: &str) -> Option<&'static str> {
        let mut needle = Route {
            node: MapNode::new(),
            pattern: pattern.to_string(),
            matcher: Regex::new("").unwrap(),
            handler: "",
        };
        let p: *mut Route = &raw mut needle;
        unsafe {
            self.map
                .find(NonNull::new_unchecked(&raw mut (*p).node))
                .map(|n| unsafe { container_of!(n, Route, node).as_ref().handler })
        }
    }

    fn remove(&mut self, pattern: &str) -> bool {
        let mut needle = Route {
            node: MapNode::new(),
            pattern: pattern.to_string(),
            matcher: Regex::new("").unwrap(),
            handler: "",
        };
        let p: *mut Route = &raw mut needle;
        unsafe {
            match self.map.find(NonNull::new_unchecked(&raw mut (*p).node)) {
                Some(n) => {
                    self.map.erase(n);
                    drop(Box::from_raw(container_of!(n, Route, node).as_ptr()));
                    true
                }
                None => false,
            }
        }
    }

    /// First route, in pattern order, whose matcher accepts `path`
    fn dispatch(&self, path: &str) -> Option<&'static str> {
        self.map.iter().find_map(|n| {
            let route = unsafe { container_of!(n, Route, node).as_ref() };
            route.matcher.is_match(path).then_some(route.handler)
        })
    }

    fn patterns(&self) -> Vec<String> {
        self.map
            .iter()
            .map(|n| unsafe { container_of!(n, Route, node).as_ref().pattern.clone() })
            .collect()
    }
}

impl Drop for RouteTable {
    fn drop(&mut self) {
        self.map.clear(|n| unsafe {
            drop(Box::from_raw(container_of!(n, Route, node).as_ptr()));
        });
    }
}

#[test]
fn test_routes_kept_in_pattern_order() {
    let mut table = RouteTable::new();
    assert!(table.add("/users/[0-9]+", "user"));
    assert!(table.add("/health", "health"));
    assert!(table.add("/assets/.*", "static"));

    assert_eq!(
        table.patterns(),
        vec!["/assets/.*", "/health", "/users/[0-9]+"]
    );
    assert!(table.map.validate().is_ok());
    assert_eq!(table.map.size(), 3);
}

#[test]
fn test_duplicate_pattern_rejected() {
    let mut table = RouteTable::new();
    assert!(table.add("/health", "health"));
    assert!(!table.add("/health", "other"));
    assert_eq!(table.get("/health"), Some("health"));
    assert_eq!(table.map.size(), 1);
}

#[test]
fn test_set_replaces_handler_in_place() {
    let mut table = RouteTable::new();
    table.add("/a", "a");
    table.add("/b", "b1");
    table.add("/c", "c");

    assert_eq!(table.set("/b", "b2"), Some("b1"));
    assert_eq!(table.set("/d", "d"), None);
    assert_eq!(table.get("/b"), Some("b2"));
    assert_eq!(table.patterns(), vec!["/a", "/b", "/c", "/d"]);
    assert!(table.map.validate().is_ok());
    assert_eq!(table.map.size(), 4);
}

#[test]
fn test_dispatch_through_compiled_matchers() {
    let mut table = RouteTable::new();
    table.add("/users/[0-9]+", "user");
    table.add("/users/me", "me");
    table.add("/health", "health");

    assert_eq!(table.dispatch("/users/42"), Some("user"));
    assert_eq!(table.dispatch("/users/me"), Some("me"));
    assert_eq!(table.dispatch("/health"), Some("health"));
    assert_eq!(table.dispatch("/users/"), None);

    assert!(table.remove("/users/[0-9]+"));
    assert!(!table.remove("/users/[0-9]+"));
    assert_eq!(table.dispatch("/users/42"), None);
}
