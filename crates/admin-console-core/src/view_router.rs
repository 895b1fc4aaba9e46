//! Sticky dashboard routing.
//!
//! `/<view>/dashboard` renders a panel and remembers it; `/dashboard` or an
//! unknown view redirects to the remembered panel.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::navigation::{NavigationRequest, Navigator};
use crate::storage::{LAST_DASHBOARD_VIEW_KEY, PersistentKv, read_or_absent, write_logged};

pub const DASHBOARD_PATH: &str = "/dashboard";
const DASHBOARD_SUFFIX: &str = "/dashboard";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DashboardView {
    #[default]
    Company,
    Users,
    Events,
    Orders,
    Promos,
}

impl DashboardView {
    pub const ALL: [Self; 5] = [
        Self::Company,
        Self::Users,
        Self::Events,
        Self::Orders,
        Self::Promos,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Company => "company",
            Self::Users => "users",
            Self::Events => "events",
            Self::Orders => "orders",
            Self::Promos => "promos",
        }
    }

    /// Exact, case-sensitive match against the URL segment.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|view| view.as_str() == raw)
    }

    #[must_use]
    pub fn canonical_path(self) -> String {
        format!("/{}{DASHBOARD_SUFFIX}", self.as_str())
    }
}

impl fmt::Display for DashboardView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown dashboard view `{0}`")]
pub struct UnknownView(pub String);

impl FromStr for DashboardView {
    type Err = UnknownView;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::parse(raw).ok_or_else(|| UnknownView(raw.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewResolution {
    Render(DashboardView),
    Redirect {
        view: DashboardView,
        to: NavigationRequest,
    },
}

impl ViewResolution {
    #[must_use]
    pub fn view(&self) -> DashboardView {
        match self {
            Self::Render(view) | Self::Redirect { view, .. } => *view,
        }
    }
}

/// Extracts the view segment from a dashboard path.
///
/// `Some(None)` for the bare `/dashboard`, `Some(Some(segment))` for
/// `/<segment>/dashboard`, `None` when the path is not a dashboard path.
#[must_use]
pub fn dashboard_segment(path: &str) -> Option<Option<&str>> {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let trimmed = path.trim_end_matches('/');
    if trimmed == DASHBOARD_PATH {
        return Some(None);
    }
    let prefix = trimmed.strip_suffix(DASHBOARD_SUFFIX)?;
    let segment = prefix.strip_prefix('/')?;
    if segment.contains('/') {
        return None;
    }
    Some(Some(segment).filter(|segment| !segment.is_empty()))
}

pub struct ViewRouter {
    kv: Arc<dyn PersistentKv>,
}

impl ViewRouter {
    pub fn new(kv: Arc<dyn PersistentKv>) -> Self {
        Self { kv }
    }

    /// Last explicitly visited view, `company` when unset or unrecognised.
    pub fn preferred_view(&self) -> DashboardView {
        let Some(stored) = read_or_absent(self.kv.as_ref(), LAST_DASHBOARD_VIEW_KEY) else {
            return DashboardView::default();
        };
        DashboardView::parse(stored.trim()).unwrap_or_else(|| {
            tracing::debug!(stored = %stored, "ignoring unrecognised dashboard preference");
            DashboardView::default()
        })
    }

    pub fn resolve(&self, segment: Option<&str>) -> ViewResolution {
        if let Some(view) = segment.and_then(DashboardView::parse) {
            write_logged(self.kv.as_ref(), LAST_DASHBOARD_VIEW_KEY, view.as_str());
            return ViewResolution::Render(view);
        }

        let view = self.preferred_view();
        tracing::debug!(
            requested = segment.unwrap_or_default(),
            fallback = %view,
            "dashboard view unset, redirecting to preference"
        );
        ViewResolution::Redirect {
            view,
            to: NavigationRequest::replace(view.canonical_path()),
        }
    }

    pub fn resolve_path(&self, path: &str) -> Option<ViewResolution> {
        dashboard_segment(path).map(|segment| self.resolve(segment))
    }

    /// Resolves `segment` and performs the redirect, returning the view to render.
    pub fn route(&self, segment: Option<&str>, navigator: &dyn Navigator) -> DashboardView {
        match self.resolve(segment) {
            ViewResolution::Render(view) => view,
            ViewResolution::Redirect { view, to } => {
                navigator.navigate(to);
                view
            }
        }
    }
}
