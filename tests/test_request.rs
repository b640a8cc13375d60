use edgeserve::http::form::form_data;
use edgeserve::http::parser::parse_http_request;
use edgeserve::http::request::{Headers, Method, Request};

fn request<'a>(method: &'a str, path: &'a str, headers: &[(&'a str, &'a str)]) -> Request<'a> {
    let mut h = Headers::new();
    for (k, v) in headers {
        h.push(k, v);
    }
    Request {
        method,
        path,
        version: "HTTP/1.1",
        headers: h,
        body: b"",
    }
}

#[test]
fn test_request_header_retrieval() {
    let req = request(
        "GET",
        "/",
        &[("Host", "example.com"), ("Content-Type", "application/json")],
    );

    assert_eq!(req.header("Host"), Some("example.com"));
    assert_eq!(req.header("Content-Type"), Some("application/json"));
    assert_eq!(req.header("Missing"), None);
}

#[test]
fn test_method_kind() {
    assert_eq!(request("GET", "/", &[]).method_kind(), Some(Method::GET));
    assert_eq!(request("DELETE", "/", &[]).method_kind(), Some(Method::DELETE));
    assert_eq!(request("get", "/", &[]).method_kind(), None);
}

#[test]
fn test_query_splits_path() {
    let req = request("GET", "/chat?room=main&x", &[]);
    let query = req.query();

    assert_eq!(query.path(), "/chat");
    assert_eq!(query.get("room"), Some("main"));
    assert_eq!(query.get("x"), Some(""));
}

#[test]
fn test_cookie_lookup_across_headers() {
    let req = request(
        "GET",
        "/",
        &[("Cookie", "theme=dark; login=abcdefgh12345678"), ("Cookie", "other=1")],
    );

    assert_eq!(req.cookie("login"), Some("abcdefgh12345678"));
    assert_eq!(req.cookie("theme"), Some("dark"));
    assert_eq!(req.cookie("other"), Some("1"));
    assert_eq!(req.cookie("missing"), None);
}

#[test]
fn test_qvalue() {
    let req = request(
        "GET",
        "/",
        &[("Accept-Encoding", "br;q=0.9, gzip;q=0.5"), ("Accept-Encoding", "deflate")],
    );

    assert_eq!(req.qvalue("Accept-Encoding", "gzip"), 0.5);
    assert_eq!(req.qvalue("Accept-Encoding", "br"), 0.9);
    assert_eq!(req.qvalue("Accept-Encoding", "deflate"), 1.0);
    assert_eq!(req.qvalue("Accept-Encoding", "zstd"), 0.0);
}

#[test]
fn test_qvalue_zero_and_malformed() {
    let req = request("GET", "/", &[("Accept-Encoding", "gzip;q=0, x;q=abc, y;level=1")]);

    assert_eq!(req.qvalue("Accept-Encoding", "gzip"), 0.0);
    assert_eq!(req.qvalue("Accept-Encoding", "x"), 0.0);
    assert_eq!(req.qvalue("Accept-Encoding", "y"), 1.0);
}

#[test]
fn test_qvalue_after_other_parameters() {
    let refused = request("GET", "/", &[("Accept-Encoding", "gzip;x=1;q=0")]);
    assert_eq!(refused.qvalue("Accept-Encoding", "gzip"), 0.0);

    let weighted = request("GET", "/", &[("Accept-Encoding", "br, gzip;level=1;q=0.5")]);
    assert_eq!(weighted.qvalue("Accept-Encoding", "gzip"), 0.5);
    assert_eq!(weighted.qvalue("Accept-Encoding", "br"), 1.0);
}

#[test]
fn test_refused_gzip_from_wire() {
    let raw = b"GET / HTTP/1.1\r\nAccept-Encoding: gzip;x=1;q=0\r\n\r\n";
    let req = parse_http_request(raw, 0).unwrap();

    assert_eq!(req.qvalue("Accept-Encoding", "gzip"), 0.0);
}

#[test]
fn test_qvalue_needs_exact_token() {
    let req = request("GET", "/", &[("Accept-Encoding", "x-gzip")]);

    assert_eq!(req.qvalue("Accept-Encoding", "gzip"), 0.0);
}

#[test]
fn test_form_body_decoding() {
    let form = form_data("username=bob&password=p%26ss+word", false);

    assert_eq!(form.decoded("username").as_deref(), Some("bob"));
    assert_eq!(form.decoded("password").as_deref(), Some("p&ss word"));
    assert_eq!(form.iter().count(), 2);
}

#[test]
fn test_form_last_value_wins() {
    let form = form_data("a=1&a=2", false);

    assert_eq!(form.get("a"), Some("2"));
    assert_eq!(form.decoded("a").as_deref(), Some("2"));
}
