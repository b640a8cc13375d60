//! The `login` cookie.

use crate::http::request::Request;
use crate::store::record::Cookie;
use crate::store::{User, UserStore};

pub const COOKIE_NAME: &str = "login";

/// Clears the login cookie in the browser.
pub const LOGOUT_COOKIE: &str = "login=0; Path=/; Max-Age=0; expires=Thu, 01 Jan 1970 00:00:00 GMT";

/// `Set-Cookie` value that keeps `cookie` for as long as browsers allow.
pub fn login_cookie(cookie: &Cookie) -> String {
    format!("{COOKIE_NAME}={cookie}; Max-Age=2147483647; Path=/")
}

/// The user whose cookie `req` carries, if any.
pub fn cookie_user(store: &UserStore, req: &Request<'_>) -> Option<User> {
    req.cookie(COOKIE_NAME)
        .and_then(|cookie| store.login_by_cookie(cookie))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_cookie_format() {
        let cookie = Cookie::from_bytes(b"0123456789abcdef").unwrap();
        assert_eq!(
            login_cookie(&cookie),
            "login=0123456789abcdef; Max-Age=2147483647; Path=/"
        );
    }
}
