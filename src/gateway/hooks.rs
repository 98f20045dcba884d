/// Host-environment callbacks the gateway needs but cannot perform itself.
pub trait GatewayHooks: Send + Sync {
    /// Surface a request failure to the user.
    fn notify(&self, message: &str);

    /// Send the user to the login route; `return_path` is where to come back to.
    fn redirect_to_login(&self, return_path: Option<&str>);

    /// Where the user currently is, preserved across a forced re-login.
    fn current_location(&self) -> Option<String> {
        None
    }
}

/// Hooks for headless use: everything ends up in the log.
#[derive(Debug, Clone, Default)]
pub struct TracingHooks {
    pub login_route: Option<String>,
}

impl TracingHooks {
    pub fn new(login_route: impl Into<String>) -> Self {
        Self {
            login_route: Some(login_route.into()),
        }
    }
}

impl GatewayHooks for TracingHooks {
    fn notify(&self, message: &str) {
        tracing::warn!(%message, "request failed");
    }

    fn redirect_to_login(&self, return_path: Option<&str>) {
        let target = self.login_url(return_path);
        tracing::warn!(%target, "session ended, login required");
    }
}

impl TracingHooks {
    /// Login route with the return path as a percent-encoded `returnUrl`
    /// query parameter, e.g. `/login?returnUrl=%2Fbooks%2FBK1`.
    pub fn login_url(&self, return_path: Option<&str>) -> String {
        let route = self.login_route.as_deref().unwrap_or("/login");
        match return_path.filter(|p| !p.is_empty()) {
            Some(path) => {
                let query = url::form_urlencoded::Serializer::new(String::new())
                    .append_pair("returnUrl", path)
                    .finish();
                format!("{}?{}", route, query)
            }
            None => route.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_url_carries_encoded_return_path() {
        let hooks = TracingHooks::new("/login");
        assert_eq!(
            hooks.login_url(Some("/books/BK7A9C2F?page=3")),
            "/login?returnUrl=%2Fbooks%2FBK7A9C2F%3Fpage%3D3"
        );
    }

    #[test]
    fn login_url_without_return_path() {
        assert_eq!(TracingHooks::default().login_url(None), "/login");
        assert_eq!(TracingHooks::new("/signin").login_url(Some("")), "/signin");
    }
}
