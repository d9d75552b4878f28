//! The signing-policy decision engine.
//!
//! Given per-message facts and a configuration, decides whether a message
//! should be signed and with which (domain, selector, key) triple. The
//! engine never fails: it either selects signing parameters or reports why
//! it skipped. It shares nothing with the verification modules.

use crate::util::CanonicalStr;
use ipnet::IpNet;
use std::{
    collections::HashMap,
    fmt::{self, Display, Formatter},
    net::IpAddr,
    str::FromStr,
};
use tracing::trace;

/// Whether the policy drives DKIM or ARC signing; the two differ only in
/// which per-task variables override the key and selector.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SignerFlavor {
    #[default]
    Dkim,
    Arc,
}

impl SignerFlavor {
    fn variable_names(self) -> (&'static str, &'static str) {
        match self {
            Self::Dkim => ("dkim_key", "dkim_selector"),
            Self::Arc => ("arc_key", "arc_selector"),
        }
    }
}

/// Which source the signing domain is taken from.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum DomainSource {
    /// The MIME From header.
    #[default]
    Header,
    /// The SMTP envelope from address.
    Envelope,
    /// The domain part of the authenticated user.
    Auth,
    /// The first recipient.
    Recipient,
}

impl CanonicalStr for DomainSource {
    fn canonical_str(&self) -> &'static str {
        match self {
            Self::Header => "header",
            Self::Envelope => "envelope",
            Self::Auth => "auth",
            Self::Recipient => "recipient",
        }
    }
}

impl Display for DomainSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_str())
    }
}

impl FromStr for DomainSource {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("header") {
            Ok(Self::Header)
        } else if s.eq_ignore_ascii_case("envelope") {
            Ok(Self::Envelope)
        } else if s.eq_ignore_ascii_case("auth") {
            Ok(Self::Auth)
        } else if s.eq_ignore_ascii_case("recipient") {
            Ok(Self::Recipient)
        } else {
            Err("unknown domain source")
        }
    }
}

/// Per-domain signing parameters.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DomainEntry {
    pub selector: Option<String>,
    pub path: Option<String>,
}

/// The signing-policy configuration.
///
/// Every optional key is an explicit [`Option`]; the engine fails closed on
/// any missing required piece.
#[derive(Clone, Debug)]
pub struct SigningConfig {
    pub flavor: SignerFlavor,

    /// Decide from request headers instead of message facts.
    pub use_http_headers: bool,
    pub http_sign_header: String,
    pub http_sign_on_reject_header: String,
    pub http_domain_header: String,
    pub http_selector_header: String,
    pub http_key_header: String,

    /// Sign mail from authenticated users.
    pub auth_only: bool,
    /// Networks whose mail is signed.
    pub sign_networks: Vec<IpNet>,
    /// Sign mail from local addresses.
    pub sign_local: bool,
    /// Sign mail arriving from non-local, unauthenticated sources.
    pub sign_inbound: bool,

    pub allow_envfrom_empty: bool,
    pub allow_hdrfrom_multiple: bool,
    pub allow_hdrfrom_mismatch: bool,
    pub allow_hdrfrom_mismatch_local: bool,
    pub allow_hdrfrom_mismatch_sign_networks: bool,
    pub allow_username_mismatch: bool,

    pub use_domain: DomainSource,
    pub use_domain_sign_networks: Option<DomainSource>,
    pub use_domain_sign_local: Option<DomainSource>,
    pub use_domain_sign_inbound: Option<DomainSource>,

    /// Collapse domains to their effective second-level domain.
    pub use_esld: bool,

    /// Per-domain signing parameters.
    pub domain: HashMap<String, DomainEntry>,
    /// Fallback selector lookup by domain.
    pub selector_map: HashMap<String, String>,
    /// Fallback key path lookup by domain.
    pub path_map: HashMap<String, String>,

    /// Global default selector.
    pub selector: Option<String>,
    /// Global default key path; `$domain` and `$selector` are substituted.
    pub path: Option<String>,
    /// Allow the global defaults after per-domain misses.
    pub try_fallback: bool,
    /// Defer key material resolution to Redis.
    pub use_redis: bool,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            flavor: SignerFlavor::Dkim,
            use_http_headers: false,
            http_sign_header: "PerformDkimSign".into(),
            http_sign_on_reject_header: "SignOnAuthFailed".into(),
            http_domain_header: "DkimDomain".into(),
            http_selector_header: "DkimSelector".into(),
            http_key_header: "DkimPrivateKey".into(),
            auth_only: true,
            sign_networks: Vec::new(),
            sign_local: true,
            sign_inbound: false,
            allow_envfrom_empty: true,
            allow_hdrfrom_multiple: false,
            allow_hdrfrom_mismatch: false,
            allow_hdrfrom_mismatch_local: false,
            allow_hdrfrom_mismatch_sign_networks: false,
            allow_username_mismatch: false,
            use_domain: DomainSource::Header,
            use_domain_sign_networks: None,
            use_domain_sign_local: None,
            use_domain_sign_inbound: None,
            use_esld: true,
            domain: HashMap::new(),
            selector_map: HashMap::new(),
            path_map: HashMap::new(),
            selector: None,
            path: None,
            try_fallback: true,
            use_redis: false,
        }
    }
}

/// The per-message facts the policy engine looks at.
#[derive(Clone, Debug, Default)]
pub struct SignTask {
    /// The SMTP AUTH user, when present.
    pub auth_user: Option<String>,
    /// The source address of the connection.
    pub source_ip: Option<IpAddr>,
    /// SMTP envelope from addresses.
    pub envelope_from: Vec<String>,
    /// MIME From addresses.
    pub header_from: Vec<String>,
    /// Envelope recipients.
    pub recipients: Vec<String>,
    /// String-keyed per-task variables.
    pub variables: HashMap<String, String>,
    /// Request headers, for HTTP-header mode.
    pub request_headers: HashMap<String, String>,
    /// Whether the message already failed DKIM verification.
    pub dkim_rejected: bool,
}

impl SignTask {
    fn request_header(&self, name: &str) -> Option<&str> {
        self.request_headers
            .iter()
            .find(|(header, _)| header.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Where the signing key material comes from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum KeySource {
    /// Path to a private key file.
    Path(String),
    /// Raw key material.
    RawKey(String),
    /// Key material to be fetched from Redis by the caller.
    Redis,
}

/// The parameters of a positive signing decision.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SigningParams {
    pub domain: String,
    pub selector: String,
    pub key: KeySource,
}

/// Why a message was not selected for signing.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SkipReason {
    /// No signing was requested via request headers.
    NotRequested,
    /// The signing request headers are incomplete.
    IncompleteRequest,
    /// The message already failed DKIM verification.
    RejectedByDkim,
    /// The sender matches none of the configured signing conditions.
    SenderNotEligible,
    EmptyEnvelopeFrom,
    MultipleFromHeaders,
    /// No source yielded a signing domain.
    NoSigningDomain,
    FromDomainMismatch,
    UsernameDomainMismatch,
    /// No selector or key material is configured for the domain.
    NoKeyConfigured,
}

impl Display for SkipReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotRequested => write!(f, "signing not requested"),
            Self::IncompleteRequest => write!(f, "incomplete signing request headers"),
            Self::RejectedByDkim => write!(f, "message failed DKIM checks"),
            Self::SenderNotEligible => write!(f, "sender not eligible"),
            Self::EmptyEnvelopeFrom => write!(f, "empty envelope from"),
            Self::MultipleFromHeaders => write!(f, "no single From header"),
            Self::NoSigningDomain => write!(f, "no signing domain"),
            Self::FromDomainMismatch => write!(f, "From domain mismatch"),
            Self::UsernameDomainMismatch => write!(f, "authenticated user domain mismatch"),
            Self::NoKeyConfigured => write!(f, "no selector or key configured"),
        }
    }
}

/// The outcome of a policy evaluation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SigningDecision {
    Sign(SigningParams),
    Skip(SkipReason),
}

impl SigningDecision {
    pub fn should_sign(&self) -> bool {
        matches!(self, Self::Sign(_))
    }
}

/// Decides whether the message described by `task` should be signed.
pub fn evaluate(config: &SigningConfig, task: &SignTask) -> SigningDecision {
    if config.use_http_headers {
        evaluate_http(config, task)
    } else {
        evaluate_native(config, task)
    }
}

fn evaluate_http(config: &SigningConfig, task: &SignTask) -> SigningDecision {
    if task.request_header(&config.http_sign_header).is_none() {
        return SigningDecision::Skip(SkipReason::NotRequested);
    }

    let domain = task.request_header(&config.http_domain_header);
    let selector = task.request_header(&config.http_selector_header);
    let key = task.request_header(&config.http_key_header);

    let (Some(domain), Some(selector), Some(key)) = (domain, selector, key) else {
        trace!("signing requested but domain, selector or key header missing");
        return SigningDecision::Skip(SkipReason::IncompleteRequest);
    };

    if task.request_header(&config.http_sign_on_reject_header).is_none() && task.dkim_rejected {
        trace!("message already failed DKIM verification");
        return SigningDecision::Skip(SkipReason::RejectedByDkim);
    }

    SigningDecision::Sign(SigningParams {
        domain: domain.to_owned(),
        selector: selector.to_owned(),
        key: KeySource::RawKey(key.to_owned()),
    })
}

fn evaluate_native(config: &SigningConfig, task: &SignTask) -> SigningDecision {
    let authenticated = task.auth_user.as_deref().filter(|user| !user.is_empty());

    // a message without a source address counts as locally submitted
    let is_local = task.source_ip.map_or(true, is_local_address);
    let is_sign_networks = task.source_ip.map_or(false, |ip| {
        config.sign_networks.iter().any(|net| net.contains(&ip))
    });

    let eligible = if config.auth_only && authenticated.is_some() {
        true
    } else if is_sign_networks {
        true
    } else if config.sign_local && is_local {
        true
    } else {
        config.sign_inbound && !is_local && authenticated.is_none()
    };

    if !eligible {
        trace!("sender not eligible for signing");
        return SigningDecision::Skip(SkipReason::SenderNotEligible);
    }

    let envelope_from = task
        .envelope_from
        .first()
        .map(|addr| addr.as_str())
        .filter(|addr| !addr.is_empty());

    if !config.allow_envfrom_empty && envelope_from.is_none() {
        return SigningDecision::Skip(SkipReason::EmptyEnvelopeFrom);
    }
    if !config.allow_hdrfrom_multiple && task.header_from.len() != 1 {
        return SigningDecision::Skip(SkipReason::MultipleFromHeaders);
    }

    let hdom = task.header_from.first().and_then(|addr| domain_of(addr));
    let edom = envelope_from.and_then(domain_of);
    let udom = authenticated.and_then(domain_of);
    let tdom = task.recipients.first().and_then(|addr| domain_of(addr));

    let source = if is_sign_networks {
        config.use_domain_sign_networks.unwrap_or(config.use_domain)
    } else if is_local {
        config.use_domain_sign_local.unwrap_or(config.use_domain)
    } else if authenticated.is_none() {
        config.use_domain_sign_inbound.unwrap_or(config.use_domain)
    } else {
        config.use_domain
    };

    let selected = match source {
        DomainSource::Header => hdom.clone(),
        DomainSource::Envelope => edom.clone(),
        DomainSource::Auth => udom.clone(),
        DomainSource::Recipient => tdom,
    };

    let Some(mut dkim_domain) = selected else {
        trace!(%source, "no domain to sign for");
        return SigningDecision::Skip(SkipReason::NoSigningDomain);
    };

    let (hdom, edom) = if config.use_esld {
        dkim_domain = effective_domain(&dkim_domain);
        (
            hdom.as_deref().map(effective_domain),
            edom.as_deref().map(effective_domain),
        )
    } else {
        (hdom, edom)
    };

    if let (Some(header), Some(envelope)) = (&hdom, &edom) {
        if header != envelope && !config.allow_hdrfrom_mismatch {
            let allowed = (config.allow_hdrfrom_mismatch_local && is_local)
                || (config.allow_hdrfrom_mismatch_sign_networks && is_sign_networks);
            if !allowed {
                trace!(%header, %envelope, "From domain mismatch");
                return SigningDecision::Skip(SkipReason::FromDomainMismatch);
            }
        }
    }

    if authenticated.is_some() && !config.allow_username_mismatch {
        let udom = if config.use_esld {
            udom.as_deref().map(effective_domain)
        } else {
            udom.clone()
        };
        if udom.as_deref() != Some(dkim_domain.as_str()) {
            trace!("authenticated user domain does not match signing domain");
            return SigningDecision::Skip(SkipReason::UsernameDomainMismatch);
        }
    }

    let mut selector = None;
    let mut key = None;

    if let Some(entry) = config.domain.get(&dkim_domain) {
        selector = entry.selector.clone();
        key = entry.path.clone().map(KeySource::Path);
    }

    let (key_var, selector_var) = config.flavor.variable_names();
    if let Some(raw) = task.variables.get(key_var) {
        key = Some(KeySource::RawKey(raw.clone()));
    }
    if let Some(sel) = task.variables.get(selector_var) {
        selector = Some(sel.clone());
    }

    if selector.is_none() {
        selector = config.selector_map.get(&dkim_domain).cloned();
    }
    if key.is_none() {
        key = config.path_map.get(&dkim_domain).cloned().map(KeySource::Path);
    }

    if selector.is_none() && config.try_fallback {
        selector = config.selector.clone();
    }
    if key.is_none() {
        if config.use_redis {
            // key material is resolved from Redis outside this module
            key = Some(KeySource::Redis);
        } else if config.try_fallback {
            key = config.path.clone().map(KeySource::Path);
        }
    }

    let (Some(selector), Some(key)) = (selector, key) else {
        trace!(domain = %dkim_domain, "no selector or key configured for domain");
        return SigningDecision::Skip(SkipReason::NoKeyConfigured);
    };

    let key = match key {
        KeySource::Path(path) => KeySource::Path(expand_path(&path, &dkim_domain, &selector)),
        other => other,
    };

    trace!(domain = %dkim_domain, %selector, "message selected for signing");

    SigningDecision::Sign(SigningParams {
        domain: dkim_domain,
        selector,
        key,
    })
}

fn domain_of(address: &str) -> Option<String> {
    address
        .rsplit_once('@')
        .map(|(_, domain)| domain.to_ascii_lowercase())
        .filter(|domain| !domain.is_empty())
}

// Effective second-level domain per the public suffix list.
fn effective_domain(domain: &str) -> String {
    psl::domain_str(domain).unwrap_or(domain).to_ascii_lowercase()
}

fn is_local_address(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(ip) => {
            ip.is_loopback() || ip.is_private() || ip.is_link_local() || ip.is_unspecified()
        }
        IpAddr::V6(ip) => {
            ip.is_loopback()
                || ip.is_unspecified()
                || (ip.segments()[0] & 0xfe00) == 0xfc00
                || (ip.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}

fn expand_path(path: &str, domain: &str, selector: &str) -> String {
    path.replace("$domain", domain).replace("$selector", selector)
}
