use std::borrow::Cow;

use tollgate_model::{ParamType, RequestDescriptor};

/// Read access to the request attributes conditions are evaluated against.
pub trait RequestView {
    /// Live value for `param_type` + `name`, or `None` when absent.
    fn lookup(&self, param_type: ParamType, name: &str) -> Option<Cow<'_, str>>;
}

impl RequestView for RequestDescriptor {
    fn lookup(&self, param_type: ParamType, name: &str) -> Option<Cow<'_, str>> {
        let value = match param_type {
            // Descriptor fields shadow body parameters of the same name.
            ParamType::Post => self
                .field(name)
                .or_else(|| self.post_params.get(name).map(String::as_str)),
            ParamType::Query => self.query.get(name).map(String::as_str),
            ParamType::Header => self
                .headers
                .get(&name.to_ascii_lowercase())
                .map(String::as_str),
            ParamType::Cookie => self.cookies.get(name).map(String::as_str),
            ParamType::Host => self.host.as_deref(),
            ParamType::Ip => self.remote_ip.as_deref(),
            ParamType::Uri => return Some(Cow::Owned(self.uri())),
            ParamType::Path => Some(self.path.as_str()),
            ParamType::Domain => self.domain(),
        };
        value.map(Cow::Borrowed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate_model::RpcType;

    fn request() -> RequestDescriptor {
        RequestDescriptor::new("pdm", "list", RpcType::Http)
            .with_path("/orders")
            .with_query("page", "2")
            .with_header("X-Tenant", "acme")
            .with_cookie("session", "abc")
            .with_post_param("module", "shadowed")
            .with_post_param("sku", "42")
            .with_host("api.example.com:8443")
            .with_remote_ip("10.0.0.7")
    }

    #[test]
    fn post_prefers_descriptor_fields() {
        let req = request();
        assert_eq!(req.lookup(ParamType::Post, "module").as_deref(), Some("pdm"));
        assert_eq!(req.lookup(ParamType::Post, "sku").as_deref(), Some("42"));
        assert_eq!(req.lookup(ParamType::Post, "missing"), None);
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let req = request();
        assert_eq!(
            req.lookup(ParamType::Header, "x-TENANT").as_deref(),
            Some("acme")
        );
    }

    #[test]
    fn location_attributes() {
        let req = request();
        assert_eq!(req.lookup(ParamType::Path, "").as_deref(), Some("/orders"));
        assert_eq!(
            req.lookup(ParamType::Host, "").as_deref(),
            Some("api.example.com:8443")
        );
        assert_eq!(
            req.lookup(ParamType::Domain, "").as_deref(),
            Some("api.example.com")
        );
        assert_eq!(req.lookup(ParamType::Ip, "").as_deref(), Some("10.0.0.7"));
        assert_eq!(req.lookup(ParamType::Query, "page").as_deref(), Some("2"));
        assert_eq!(req.lookup(ParamType::Cookie, "session").as_deref(), Some("abc"));
    }
}
