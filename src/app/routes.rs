use std::io::Write;

use tracing::{debug, info};

use crate::app::{App, session, static_files};
use crate::error::ProtocolError;
use crate::http::form::form_data;
use crate::http::request::{Method, Request};
use crate::http::response::{Response, ResponseBuilder, StatusCode};
use crate::http::writer::ResponseWriter;
use crate::server::Dispatch;
use crate::store::{StoreError, User};
use crate::ws::handshake;

/// Replaced in `index_user.html` with the page's user object.
const GLOBAL_VARS_TOKEN: &str = "<!-- GLOBAL_VARS_JS -->";

fn respond<W: Write>(out: &mut W, response: &Response) -> anyhow::Result<()> {
    ResponseWriter::new(response).write_to(out)?;
    Ok(())
}

impl App {
    /// Answers one parsed request on `d`.
    ///
    /// | method | path        | action                              |
    /// |--------|-------------|-------------------------------------|
    /// | GET    | `/`         | index page, personalised if logged in |
    /// | GET    | `/chat`     | WebSocket upgrade                   |
    /// | GET    | other       | static file                         |
    /// | POST   | `/login`    | log in, or log out on empty body    |
    /// | POST   | `/register` | create an account and log in        |
    pub(crate) fn route(&self, d: &Dispatch<'_>, req: &Request<'_>) -> anyhow::Result<()> {
        let query = req.query();
        let path = query.path();
        let user = session::cookie_user(&self.store, req);

        match req.method_kind() {
            Some(Method::GET) => match path {
                "/" => self.index(d, req, user.as_ref()),
                "/chat" => self.chat(d, req, user),
                _ => {
                    static_files::check_path(path)?;
                    let file = self.static_dir.join(path.trim_start_matches('/'));
                    let mut out = d.conn.writer();
                    static_files::send_file(&mut out, &self.cache, &self.mimes, req, &file)
                }
            },
            Some(Method::POST) => match path {
                "/login" => self.login(d, req, user),
                "/register" => self.register(d, req),
                _ => {
                    let msg = format!("POST with unexpected path \"{path}\"");
                    Err(ProtocolError::not_found(msg).into())
                }
            },
            Some(_) => Err(ProtocolError::method_not_allowed(format!(
                "method {} not allowed",
                req.method
            ))
            .into()),
            None => Err(ProtocolError::not_implemented(format!(
                "unknown method \"{}\"",
                req.method
            ))
            .into()),
        }
    }

    fn index(
        &self,
        d: &Dispatch<'_>,
        req: &Request<'_>,
        user: Option<&User>,
    ) -> anyhow::Result<()> {
        let Some(user) = user else {
            let file = self.pages_dir.join("index.html");
            let mut out = d.conn.writer();
            return static_files::send_file(&mut out, &self.cache, &self.mimes, req, &file);
        };

        let file = self.pages_dir.join("index_user.html");
        let page = {
            let view = self
                .cache
                .get(&file, false)
                .map_err(|e| ProtocolError::not_found(format!("file {}: {e}", file.display())))?;
            match view.bytes() {
                Some(bytes) => String::from_utf8_lossy(bytes).into_owned(),
                None => std::fs::read_to_string(&file)?,
            }
        };
        let vars = format!("\nconst user = {{name:\"{}\"}};\n", user.name);
        let page = page.replacen(GLOBAL_VARS_TOKEN, &vars, 1);

        let response = ResponseBuilder::new(StatusCode::Ok)
            .header("Content-Type", "text/html; charset=UTF-8")
            .header("Connection", "close")
            .body(page.into_bytes())
            .build();
        respond(&mut d.conn.writer(), &response)
    }

    /// Upgrades to WebSocket. The write lock is held from before the
    /// connection joins the broadcast set until the 101 is out, so no frame
    /// can overtake the reply.
    fn chat(&self, d: &Dispatch<'_>, req: &Request<'_>, user: Option<User>) -> anyhow::Result<()> {
        let hs = handshake::validate(req)?;
        let mut out = d.conn.writer();
        d.conn.set_user(user.map(|u| u.name));
        d.register_for_repeated_events()?;
        respond(&mut out, &handshake::response(&hs))?;
        info!(token = d.conn.token().0, user = ?d.conn.user(), "websocket upgraded");
        Ok(())
    }

    fn login(
        &self,
        d: &Dispatch<'_>,
        req: &Request<'_>,
        current: Option<User>,
    ) -> anyhow::Result<()> {
        if req.body.is_empty() {
            respond(&mut d.conn.writer(), &Response::see_other("/", Some(session::LOGOUT_COOKIE)))?;
            match current {
                Some(user) => info!(user = %user.name, "logged out"),
                None => info!("logged out nobody"),
            }
            return Ok(());
        }

        let (name, password) = credentials(req)?;
        match self.store.login_by_password(&name, &password) {
            Some(user) => {
                let cookie = session::login_cookie(&user.cookie);
                respond(&mut d.conn.writer(), &Response::see_other("/", Some(&cookie)))?;
                info!(user = %user.name, "logged in");
            }
            None => {
                respond(&mut d.conn.writer(), &Response::error(StatusCode::Unauthorized))?;
                info!(user = %name, "failed login");
            }
        }
        Ok(())
    }

    fn register(&self, d: &Dispatch<'_>, req: &Request<'_>) -> anyhow::Result<()> {
        let (name, password) = credentials(req)?;
        match self.store.create_user(&name, &password) {
            Ok(user) => {
                let cookie = session::login_cookie(&user.cookie);
                respond(&mut d.conn.writer(), &Response::see_other("/", Some(&cookie)))?;
                info!(user = %user.name, "registered");
                Ok(())
            }
            Err(StoreError::DuplicateName(name)) => {
                debug!(user = %name, "name taken");
                respond(&mut d.conn.writer(), &Response::error(StatusCode::Forbidden))
            }
            Err(e @ (StoreError::InvalidName(_) | StoreError::NameTooLong)) => {
                Err(ProtocolError::bad_request(e.to_string()).into())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// `username` and `password` from a form body.
fn credentials(req: &Request<'_>) -> Result<(String, String), ProtocolError> {
    let body = std::str::from_utf8(req.body)
        .map_err(|_| ProtocolError::bad_request("form data is not UTF-8"))?;
    let form = form_data(body, false);
    let name = form.require("username")?.into_owned();
    let password = form.require("password")?.into_owned();
    Ok((name, password))
}
