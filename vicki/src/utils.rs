// Browser helpers built on the capability proxy

use crate::error::{CapabilityError, UpstreamError};
use crate::sandbox::ScriptApi;
use serde::{Deserialize, Serialize};
use serde_json::json;
use vicki_script::BrowserNamespace;

/// The fields of a browser tab scripts usually care about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tab {
    pub id: i64,
    #[serde(default)]
    pub window_id: Option<i64>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub active: bool,
}

#[derive(Debug, Deserialize)]
struct Window {
    id: i64,
    #[serde(default)]
    focused: bool,
}

/// Active tab of the last focused window. `None` when no browser window has
/// focus, e.g. another application is in front.
pub async fn focused_tab(vs: &ScriptApi) -> Result<Option<Tab>, CapabilityError> {
    let window = match vs
        .browser(BrowserNamespace::Windows, "getLastFocused", json!({ "populate": false }))
        .await
    {
        Ok(window) => window,
        Err(CapabilityError::Upstream(UpstreamError::Browser(reason))) => {
            tracing::debug!(script = %vs.script_id(), %reason, "no last focused window");
            return Ok(None);
        }
        Err(e) => return Err(e),
    };
    let window: Window = match serde_json::from_value(window) {
        Ok(window) => window,
        Err(_) => return Ok(None),
    };
    if !window.focused {
        return Ok(None);
    }

    let tabs = vs
        .browser(
            BrowserNamespace::Tabs,
            "query",
            json!({ "active": true, "windowId": window.id }),
        )
        .await?;
    let tabs: Vec<Tab> = serde_json::from_value(tabs)
        .map_err(|e| UpstreamError::Browser(format!("unexpected tabs.query result: {}", e)))?;
    Ok(tabs.into_iter().next())
}
