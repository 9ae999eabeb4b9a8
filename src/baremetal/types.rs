use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use super::errors::BaremetalError;

/// Header carrying the negotiated API microversion
pub const API_VERSION_HEADER: &str = "X-OpenStack-Ironic-API-Version";

/// Bare metal API microversion, e.g. `1.46`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ApiVersion {
    pub major: u16,
    pub minor: u16,
}

impl ApiVersion {
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    /// Last version in which newly created nodes start in `available`
    pub const LEGACY_AVAILABLE: ApiVersion = ApiVersion::new(1, 10);
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for ApiVersion {
    type Err = BaremetalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || BaremetalError::InvalidArgument(format!("invalid API version: {s:?}"));
        let (major, minor) = s.trim().split_once('.').ok_or_else(invalid)?;
        Ok(ApiVersion {
            major: major.parse().map_err(|_| invalid())?,
            minor: minor.parse().map_err(|_| invalid())?,
        })
    }
}

/// Provisioning state reported by the service.
///
/// Unknown values are preserved in `Other` so that newer services do not
/// break deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProvisionState {
    Enroll,
    Verifying,
    Manageable,
    Inspecting,
    InspectWait,
    InspectFailed,
    Cleaning,
    CleanWait,
    CleanFailed,
    Available,
    Deploying,
    WaitCallBack,
    DeployFailed,
    Active,
    Deleting,
    Error,
    Rescuing,
    RescueWait,
    RescueFailed,
    Rescue,
    Unrescuing,
    UnrescueFailed,
    Adopting,
    AdoptFailed,
    Other(String),
}

impl ProvisionState {
    pub fn as_str(&self) -> &str {
        match self {
            ProvisionState::Enroll => "enroll",
            ProvisionState::Verifying => "verifying",
            ProvisionState::Manageable => "manageable",
            ProvisionState::Inspecting => "inspecting",
            ProvisionState::InspectWait => "inspect wait",
            ProvisionState::InspectFailed => "inspect failed",
            ProvisionState::Cleaning => "cleaning",
            ProvisionState::CleanWait => "clean wait",
            ProvisionState::CleanFailed => "clean failed",
            ProvisionState::Available => "available",
            ProvisionState::Deploying => "deploying",
            ProvisionState::WaitCallBack => "wait call-back",
            ProvisionState::DeployFailed => "deploy failed",
            ProvisionState::Active => "active",
            ProvisionState::Deleting => "deleting",
            ProvisionState::Error => "error",
            ProvisionState::Rescuing => "rescuing",
            ProvisionState::RescueWait => "rescue wait",
            ProvisionState::RescueFailed => "rescue failed",
            ProvisionState::Rescue => "rescue",
            ProvisionState::Unrescuing => "unrescuing",
            ProvisionState::UnrescueFailed => "unrescue failed",
            ProvisionState::Adopting => "adopting",
            ProvisionState::AdoptFailed => "adopt failed",
            ProvisionState::Other(other) => other,
        }
    }

    /// `error` or any of the `* failed` states
    pub fn is_failure(&self) -> bool {
        match self {
            ProvisionState::Error
            | ProvisionState::InspectFailed
            | ProvisionState::CleanFailed
            | ProvisionState::DeployFailed
            | ProvisionState::RescueFailed
            | ProvisionState::UnrescueFailed
            | ProvisionState::AdoptFailed => true,
            ProvisionState::Other(other) => other == "error" || other.ends_with(" failed"),
            _ => false,
        }
    }
}

impl From<&str> for ProvisionState {
    fn from(value: &str) -> Self {
        match value {
            "enroll" => ProvisionState::Enroll,
            "verifying" => ProvisionState::Verifying,
            "manageable" => ProvisionState::Manageable,
            "inspecting" => ProvisionState::Inspecting,
            "inspect wait" => ProvisionState::InspectWait,
            "inspect failed" => ProvisionState::InspectFailed,
            "cleaning" => ProvisionState::Cleaning,
            "clean wait" => ProvisionState::CleanWait,
            "clean failed" => ProvisionState::CleanFailed,
            "available" => ProvisionState::Available,
            "deploying" => ProvisionState::Deploying,
            "wait call-back" => ProvisionState::WaitCallBack,
            "deploy failed" => ProvisionState::DeployFailed,
            "active" => ProvisionState::Active,
            "deleting" => ProvisionState::Deleting,
            "error" => ProvisionState::Error,
            "rescuing" => ProvisionState::Rescuing,
            "rescue wait" => ProvisionState::RescueWait,
            "rescue failed" => ProvisionState::RescueFailed,
            "rescue" => ProvisionState::Rescue,
            "unrescuing" => ProvisionState::Unrescuing,
            "unrescue failed" => ProvisionState::UnrescueFailed,
            "adopting" => ProvisionState::Adopting,
            "adopt failed" => ProvisionState::AdoptFailed,
            other => ProvisionState::Other(other.to_string()),
        }
    }
}

impl From<String> for ProvisionState {
    fn from(value: String) -> Self {
        ProvisionState::from(value.as_str())
    }
}

impl From<ProvisionState> for String {
    fn from(value: ProvisionState) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ProvisionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProvisionState {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(ProvisionState::from(s))
    }
}

/// Action requested from the provisioning state machine.
///
/// A verb is not a state: `manage` moves a node into `manageable`,
/// `provide` into `available`, and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProvisionVerb {
    Manage,
    Provide,
    Inspect,
    Clean,
    Active,
    Rebuild,
    Deleted,
    Abort,
    Adopt,
    Rescue,
    Unrescue,
}

impl ProvisionVerb {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisionVerb::Manage => "manage",
            ProvisionVerb::Provide => "provide",
            ProvisionVerb::Inspect => "inspect",
            ProvisionVerb::Clean => "clean",
            ProvisionVerb::Active => "active",
            ProvisionVerb::Rebuild => "rebuild",
            ProvisionVerb::Deleted => "deleted",
            ProvisionVerb::Abort => "abort",
            ProvisionVerb::Adopt => "adopt",
            ProvisionVerb::Rescue => "rescue",
            ProvisionVerb::Unrescue => "unrescue",
        }
    }

    /// Stable state the node settles in once the verb completes.
    /// `None` for verbs that cannot be waited on.
    pub fn expected_state(&self) -> Option<ProvisionState> {
        match self {
            ProvisionVerb::Manage | ProvisionVerb::Inspect | ProvisionVerb::Clean => {
                Some(ProvisionState::Manageable)
            }
            ProvisionVerb::Provide | ProvisionVerb::Deleted => Some(ProvisionState::Available),
            ProvisionVerb::Active
            | ProvisionVerb::Rebuild
            | ProvisionVerb::Adopt
            | ProvisionVerb::Unrescue => Some(ProvisionState::Active),
            ProvisionVerb::Rescue => Some(ProvisionState::Rescue),
            ProvisionVerb::Abort => None,
        }
    }

    /// Microversion that introduced the verb
    pub fn min_api_version(&self) -> ApiVersion {
        match self {
            ProvisionVerb::Manage | ProvisionVerb::Provide => ApiVersion::new(1, 4),
            ProvisionVerb::Inspect => ApiVersion::new(1, 6),
            ProvisionVerb::Abort => ApiVersion::new(1, 13),
            ProvisionVerb::Clean => ApiVersion::new(1, 15),
            ProvisionVerb::Adopt => ApiVersion::new(1, 17),
            ProvisionVerb::Rescue | ProvisionVerb::Unrescue => ApiVersion::new(1, 38),
            ProvisionVerb::Active | ProvisionVerb::Rebuild | ProvisionVerb::Deleted => {
                ApiVersion::new(1, 1)
            }
        }
    }
}

impl fmt::Display for ProvisionVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProvisionVerb {
    type Err = BaremetalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "manage" => Ok(ProvisionVerb::Manage),
            "provide" => Ok(ProvisionVerb::Provide),
            "inspect" => Ok(ProvisionVerb::Inspect),
            "clean" => Ok(ProvisionVerb::Clean),
            "active" | "deploy" => Ok(ProvisionVerb::Active),
            "rebuild" => Ok(ProvisionVerb::Rebuild),
            "deleted" | "delete" | "undeploy" => Ok(ProvisionVerb::Deleted),
            "abort" => Ok(ProvisionVerb::Abort),
            "adopt" => Ok(ProvisionVerb::Adopt),
            "rescue" => Ok(ProvisionVerb::Rescue),
            "unrescue" => Ok(ProvisionVerb::Unrescue),
            other => Err(BaremetalError::InvalidArgument(format!(
                "unknown provision state verb: {other:?}"
            ))),
        }
    }
}

impl Serialize for ProvisionVerb {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Power state reported by the service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PowerState {
    PowerOn,
    PowerOff,
    Rebooting,
    SoftPowerOff,
    SoftRebooting,
    Error,
    Other(String),
}

impl PowerState {
    pub fn as_str(&self) -> &str {
        match self {
            PowerState::PowerOn => "power on",
            PowerState::PowerOff => "power off",
            PowerState::Rebooting => "rebooting",
            PowerState::SoftPowerOff => "soft power off",
            PowerState::SoftRebooting => "soft rebooting",
            PowerState::Error => "error",
            PowerState::Other(other) => other,
        }
    }
}

impl From<String> for PowerState {
    fn from(value: String) -> Self {
        match value.as_str() {
            "power on" => PowerState::PowerOn,
            "power off" => PowerState::PowerOff,
            "rebooting" => PowerState::Rebooting,
            "soft power off" => PowerState::SoftPowerOff,
            "soft rebooting" => PowerState::SoftRebooting,
            "error" => PowerState::Error,
            _ => PowerState::Other(value),
        }
    }
}

impl From<PowerState> for String {
    fn from(value: PowerState) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Power action that can be requested for a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetPowerState {
    PowerOn,
    PowerOff,
    Rebooting,
    SoftPowerOff,
    SoftRebooting,
}

impl TargetPowerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetPowerState::PowerOn => "power on",
            TargetPowerState::PowerOff => "power off",
            TargetPowerState::Rebooting => "rebooting",
            TargetPowerState::SoftPowerOff => "soft power off",
            TargetPowerState::SoftRebooting => "soft rebooting",
        }
    }

    /// Power state the node reports once the action completes
    pub fn expected_state(&self) -> PowerState {
        match self {
            TargetPowerState::PowerOn
            | TargetPowerState::Rebooting
            | TargetPowerState::SoftRebooting => PowerState::PowerOn,
            TargetPowerState::PowerOff | TargetPowerState::SoftPowerOff => PowerState::PowerOff,
        }
    }

    pub fn min_api_version(&self) -> ApiVersion {
        match self {
            TargetPowerState::SoftPowerOff | TargetPowerState::SoftRebooting => {
                ApiVersion::new(1, 27)
            }
            _ => ApiVersion::new(1, 1),
        }
    }
}

impl fmt::Display for TargetPowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetPowerState {
    type Err = BaremetalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace(['-', '_'], " ").as_str() {
            "power on" | "on" => Ok(TargetPowerState::PowerOn),
            "power off" | "off" => Ok(TargetPowerState::PowerOff),
            "rebooting" | "reboot" => Ok(TargetPowerState::Rebooting),
            "soft power off" => Ok(TargetPowerState::SoftPowerOff),
            "soft rebooting" | "soft reboot" => Ok(TargetPowerState::SoftRebooting),
            other => Err(BaremetalError::InvalidArgument(format!(
                "unknown power state: {other:?}"
            ))),
        }
    }
}

impl Serialize for TargetPowerState {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Very old services report `null` for nodes that are available
fn nullable_provision_state<'de, D>(deserializer: D) -> Result<ProvisionState, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.map(ProvisionState::from).unwrap_or(ProvisionState::Available))
}

fn default_provision_state() -> ProvisionState {
    ProvisionState::Available
}

/// A bare metal node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(rename = "uuid")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub driver: String,
    #[serde(
        default = "default_provision_state",
        deserialize_with = "nullable_provision_state"
    )]
    pub provision_state: ProvisionState,
    #[serde(default)]
    pub target_provision_state: Option<ProvisionState>,
    #[serde(default)]
    pub power_state: Option<PowerState>,
    #[serde(default)]
    pub target_power_state: Option<PowerState>,
    #[serde(rename = "maintenance", default)]
    pub is_maintenance: bool,
    #[serde(default)]
    pub maintenance_reason: Option<String>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub reservation: Option<String>,
    #[serde(rename = "instance_uuid", default)]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub resource_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_info: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Map<String, Value>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub provision_updated_at: Option<DateTime<Utc>>,
}

impl Node {
    /// Name if set, otherwise the UUID
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Anything that identifies a node: a UUID, a name or the node itself
pub trait NodeIdentity {
    fn node_ident(&self) -> &str;
}

impl NodeIdentity for str {
    fn node_ident(&self) -> &str {
        self
    }
}

impl NodeIdentity for String {
    fn node_ident(&self) -> &str {
        self
    }
}

impl NodeIdentity for Node {
    fn node_ident(&self) -> &str {
        &self.id
    }
}

impl<T: NodeIdentity + ?Sized> NodeIdentity for &T {
    fn node_ident(&self) -> &str {
        (**self).node_ident()
    }
}

/// State a node is left in right after creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitialProvisionState {
    Enroll,
    Manageable,
    #[default]
    Available,
}

impl From<InitialProvisionState> for ProvisionState {
    fn from(value: InitialProvisionState) -> Self {
        match value {
            InitialProvisionState::Enroll => ProvisionState::Enroll,
            InitialProvisionState::Manageable => ProvisionState::Manageable,
            InitialProvisionState::Available => ProvisionState::Available,
        }
    }
}

impl FromStr for InitialProvisionState {
    type Err = BaremetalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "enroll" => Ok(InitialProvisionState::Enroll),
            "manageable" => Ok(InitialProvisionState::Manageable),
            "available" => Ok(InitialProvisionState::Available),
            other => Err(BaremetalError::InvalidArgument(format!(
                "nodes can only be created in enroll, manageable or available, not {other:?}"
            ))),
        }
    }
}

/// Properties of a node to create
#[derive(Debug, Clone, Default, Serialize)]
pub struct NodeSpec {
    pub driver: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "uuid", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_info: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<Map<String, Value>>,
    /// Not sent to the service; selects the microversion and any follow-up transitions
    #[serde(skip)]
    pub provision_state: Option<InitialProvisionState>,
}

impl NodeSpec {
    pub fn new(driver: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_provision_state(mut self, state: InitialProvisionState) -> Self {
        self.provision_state = Some(state);
        self
    }

    pub fn with_resource_class(mut self, resource_class: impl Into<String>) -> Self {
        self.resource_class = Some(resource_class.into());
        self
    }

    pub fn initial_state(&self) -> InitialProvisionState {
        self.provision_state.unwrap_or_default()
    }
}

/// Filters for listing nodes
#[derive(Debug, Clone, Default)]
pub struct NodeQuery {
    /// Request full node records instead of summaries
    pub details: bool,
    pub provision_state: Option<ProvisionState>,
    pub maintenance: Option<bool>,
    pub driver: Option<String>,
    pub resource_class: Option<String>,
    /// Page size; all pages are always fetched
    pub limit: Option<usize>,
}

impl NodeQuery {
    pub fn detailed() -> Self {
        Self {
            details: true,
            ..Default::default()
        }
    }

    pub fn matches(&self, node: &Node) -> bool {
        self.provision_state
            .as_ref()
            .is_none_or(|state| &node.provision_state == state)
            && self
                .maintenance
                .is_none_or(|maintenance| node.is_maintenance == maintenance)
            && self.driver.as_ref().is_none_or(|driver| &node.driver == driver)
            && self
                .resource_class
                .as_ref()
                .is_none_or(|class| node.resource_class.as_ref() == Some(class))
    }

    pub fn to_query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(state) = &self.provision_state {
            pairs.push(("provision_state", state.to_string()));
        }
        if let Some(maintenance) = self.maintenance {
            pairs.push(("maintenance", maintenance.to_string()));
        }
        if let Some(driver) = &self.driver {
            pairs.push(("driver", driver.clone()));
        }
        if let Some(class) = &self.resource_class {
            pairs.push(("resource_class", class.clone()));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit", limit.to_string()));
        }
        pairs
    }
}

/// One page of a node listing
#[derive(Debug, Clone, Deserialize)]
pub struct NodePage {
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub next: Option<String>,
}

/// JSON patch operation used to update node properties
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOperation {
    Add { path: String, value: Value },
    Replace { path: String, value: Value },
    Remove { path: String },
}

impl PatchOperation {
    pub fn path(&self) -> &str {
        match self {
            PatchOperation::Add { path, .. }
            | PatchOperation::Replace { path, .. }
            | PatchOperation::Remove { path } => path,
        }
    }
}

/// Body of a provisioning state change request
#[derive(Debug, Clone, Serialize)]
pub struct TransitionRequest {
    pub target: ProvisionVerb,
    #[serde(rename = "configdrive", skip_serializing_if = "Option::is_none")]
    pub config_drive: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clean_steps: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rescue_password: Option<String>,
}

impl TransitionRequest {
    pub fn new(target: ProvisionVerb) -> Self {
        Self {
            target,
            config_drive: None,
            clean_steps: None,
            rescue_password: None,
        }
    }

    /// Reject argument combinations the service would refuse anyway
    pub fn validate(&self) -> Result<(), BaremetalError> {
        if self.config_drive.is_some()
            && !matches!(self.target, ProvisionVerb::Active | ProvisionVerb::Rebuild)
        {
            return Err(BaremetalError::InvalidArgument(format!(
                "config drive can only be provided with active or rebuild, not {}",
                self.target
            )));
        }
        match (self.target, &self.clean_steps) {
            (ProvisionVerb::Clean, None) => {
                return Err(BaremetalError::InvalidArgument(
                    "clean steps are required for the clean verb".to_string(),
                ))
            }
            (ProvisionVerb::Clean, Some(_)) | (_, None) => {}
            (other, Some(_)) => {
                return Err(BaremetalError::InvalidArgument(format!(
                    "clean steps can only be provided with clean, not {other}"
                )))
            }
        }
        match (self.target, &self.rescue_password) {
            (ProvisionVerb::Rescue, None) => Err(BaremetalError::InvalidArgument(
                "a rescue password is required for the rescue verb".to_string(),
            )),
            (ProvisionVerb::Rescue, Some(_)) | (_, None) => Ok(()),
            (other, Some(_)) => Err(BaremetalError::InvalidArgument(format!(
                "a rescue password can only be provided with rescue, not {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_api_version_parse_and_order() {
        let version: ApiVersion = "1.46".parse().unwrap();
        assert_eq!(version, ApiVersion::new(1, 46));
        assert_eq!(version.to_string(), "1.46");
        assert!(ApiVersion::new(1, 9) < ApiVersion::new(1, 10));
        assert!("1".parse::<ApiVersion>().is_err());
        assert!("one.two".parse::<ApiVersion>().is_err());
    }

    #[test]
    fn test_provision_state_round_trips_unknown_values() {
        let state = ProvisionState::from("servicing");
        assert_eq!(state, ProvisionState::Other("servicing".to_string()));
        assert_eq!(state.to_string(), "servicing");
        assert_eq!(ProvisionState::from("inspect wait"), ProvisionState::InspectWait);
    }

    #[test]
    fn test_failure_states() {
        assert!(ProvisionState::Error.is_failure());
        assert!(ProvisionState::CleanFailed.is_failure());
        assert!(ProvisionState::Other("service failed".to_string()).is_failure());
        assert!(!ProvisionState::Manageable.is_failure());
        assert!(!ProvisionState::Verifying.is_failure());
    }

    #[test]
    fn test_verb_expected_states() {
        assert_eq!(
            ProvisionVerb::Manage.expected_state(),
            Some(ProvisionState::Manageable)
        );
        assert_eq!(
            ProvisionVerb::Provide.expected_state(),
            Some(ProvisionState::Available)
        );
        assert_eq!(
            ProvisionVerb::Deleted.expected_state(),
            Some(ProvisionState::Available)
        );
        assert_eq!(ProvisionVerb::Rescue.expected_state(), Some(ProvisionState::Rescue));
        assert_eq!(ProvisionVerb::Abort.expected_state(), None);
    }

    #[test]
    fn test_verb_aliases() {
        assert_eq!("deploy".parse::<ProvisionVerb>().unwrap(), ProvisionVerb::Active);
        assert_eq!("undeploy".parse::<ProvisionVerb>().unwrap(), ProvisionVerb::Deleted);
        assert_eq!(" Manage ".parse::<ProvisionVerb>().unwrap(), ProvisionVerb::Manage);
        assert!("enroll".parse::<ProvisionVerb>().is_err());
    }

    #[test]
    fn test_node_deserializes_service_payload() {
        let node: Node = serde_json::from_value(json!({
            "uuid": "5c9dcd04-2073-49bc-9618-99ae634d8971",
            "name": "node-name",
            "driver": "fake-hardware",
            "provision_state": "enroll",
            "target_provision_state": null,
            "power_state": null,
            "maintenance": false,
            "last_error": null,
            "instance_uuid": null,
            "created_at": "2024-03-01T10:00:00+00:00",
            "properties": {"cpus": 8},
            "links": []
        }))
        .unwrap();

        assert_eq!(node.id, "5c9dcd04-2073-49bc-9618-99ae634d8971");
        assert_eq!(node.name.as_deref(), Some("node-name"));
        assert_eq!(node.display_name(), "node-name");
        assert_eq!(node.provision_state, ProvisionState::Enroll);
        assert!(node.power_state.is_none());
        assert!(!node.is_maintenance);
        assert!(node.created_at.is_some());
        assert_eq!(node.properties.unwrap()["cpus"], json!(8));
    }

    #[test]
    fn test_null_provision_state_means_available() {
        let node: Node = serde_json::from_value(json!({
            "uuid": "abc",
            "provision_state": null
        }))
        .unwrap();
        assert_eq!(node.provision_state, ProvisionState::Available);
        assert_eq!(node.display_name(), "abc");
    }

    #[test]
    fn test_node_spec_serialization_skips_client_side_fields() {
        let spec = NodeSpec::new("fake-hardware")
            .with_name("node-name")
            .with_provision_state(InitialProvisionState::Enroll);
        let body = serde_json::to_value(&spec).unwrap();
        assert_eq!(body, json!({"driver": "fake-hardware", "name": "node-name"}));
        assert_eq!(spec.initial_state(), InitialProvisionState::Enroll);
        assert_eq!(
            NodeSpec::new("ipmi").initial_state(),
            InitialProvisionState::Available
        );
    }

    #[test]
    fn test_transition_request_validation() {
        assert!(TransitionRequest::new(ProvisionVerb::Manage).validate().is_ok());
        assert!(TransitionRequest::new(ProvisionVerb::Clean).validate().is_err());
        assert!(TransitionRequest::new(ProvisionVerb::Rescue).validate().is_err());

        let mut deploy = TransitionRequest::new(ProvisionVerb::Active);
        deploy.config_drive = Some("H4sI".to_string());
        assert!(deploy.validate().is_ok());
        assert_eq!(
            serde_json::to_value(&deploy).unwrap(),
            json!({"target": "active", "configdrive": "H4sI"})
        );

        let mut manage = TransitionRequest::new(ProvisionVerb::Manage);
        manage.config_drive = Some("H4sI".to_string());
        assert!(manage.validate().is_err());
    }

    #[test]
    fn test_query_matching() {
        let node: Node = serde_json::from_value(json!({
            "uuid": "abc",
            "driver": "fake-hardware",
            "provision_state": "manageable",
            "maintenance": true
        }))
        .unwrap();

        assert!(NodeQuery::default().matches(&node));
        let query = NodeQuery {
            provision_state: Some(ProvisionState::Manageable),
            maintenance: Some(true),
            ..Default::default()
        };
        assert!(query.matches(&node));
        let query = NodeQuery {
            driver: Some("ipmi".to_string()),
            ..Default::default()
        };
        assert!(!query.matches(&node));
    }

    #[test]
    fn test_node_identity() {
        fn ident<N: NodeIdentity + ?Sized>(node: &N) -> String {
            node.node_ident().to_string()
        }
        assert_eq!(ident("node-name"), "node-name");
        assert_eq!(ident(&"uuid".to_string()), "uuid");
    }
}
