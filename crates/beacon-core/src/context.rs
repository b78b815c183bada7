//! Build metadata supplied by the orchestrator.
//!
//! Concourse exposes build metadata to `put` through environment variables.
//! The CLI captures them once with [`BuildContext::from_env`]; everything
//! downstream receives the context explicitly.

use reqwest::Url;

/// Metadata describing the build that invoked the resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildContext {
    pub build_id: Option<String>,
    pub build_name: Option<String>,
    pub job_name: Option<String>,
    pub pipeline_name: Option<String>,
    pub pipeline_instance_vars: Option<String>,
    pub team_name: Option<String>,
    pub atc_external_url: Option<String>,
}

impl BuildContext {
    /// Capture the `BUILD_*` and `ATC_EXTERNAL_URL` variables of the process.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a context from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            build_id: get("BUILD_ID"),
            build_name: get("BUILD_NAME"),
            job_name: get("BUILD_JOB_NAME"),
            pipeline_name: get("BUILD_PIPELINE_NAME"),
            pipeline_instance_vars: get("BUILD_PIPELINE_INSTANCE_VARS"),
            team_name: get("BUILD_TEAM_NAME"),
            atc_external_url: get("ATC_EXTERNAL_URL"),
        }
    }

    /// Link to the build page in the Concourse web UI.
    ///
    /// `None` unless all of the URL, team, pipeline, job and build name are known.
    pub fn build_url(&self) -> Option<String> {
        let mut url = Url::parse(self.atc_external_url.as_deref()?).ok()?;
        let segments = [
            "teams",
            self.team_name.as_deref()?,
            "pipelines",
            self.pipeline_name.as_deref()?,
            "jobs",
            self.job_name.as_deref()?,
            "builds",
            self.build_name.as_deref()?,
        ];
        url.path_segments_mut().ok()?.pop_if_empty().extend(segments);
        if let Some(vars) = &self.pipeline_instance_vars {
            url.query_pairs_mut().append_pair("vars", vars);
        }
        Some(url.to_string())
    }

    /// `pipeline/job`, or whichever part is known.
    pub fn job_path(&self) -> String {
        match (self.pipeline_name.as_deref(), self.job_name.as_deref()) {
            (Some(p), Some(j)) => format!("{p}/{j}"),
            (Some(p), None) => p.to_string(),
            (None, Some(j)) => j.to_string(),
            (None, None) => "unknown".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn concourse_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("BUILD_ID", "1234"),
            ("BUILD_NAME", "42"),
            ("BUILD_JOB_NAME", "unit-tests"),
            ("BUILD_PIPELINE_NAME", "beacon"),
            ("BUILD_TEAM_NAME", "main"),
            ("ATC_EXTERNAL_URL", "https://ci.example.com/"),
        ])
    }

    fn context_from(env: &HashMap<&'static str, &'static str>) -> BuildContext {
        BuildContext::from_lookup(|key| env.get(key).map(|v| v.to_string()))
    }

    #[test]
    fn test_build_url() {
        let ctx = context_from(&concourse_env());
        assert_eq!(
            ctx.build_url().as_deref(),
            Some("https://ci.example.com/teams/main/pipelines/beacon/jobs/unit-tests/builds/42")
        );
    }

    #[test]
    fn test_build_url_with_instance_vars() {
        let mut env = concourse_env();
        env.insert("BUILD_PIPELINE_INSTANCE_VARS", r#"{"branch":"main"}"#);
        let url = context_from(&env).build_url().unwrap();
        assert!(url.ends_with("/builds/42?vars=%7B%22branch%22%3A%22main%22%7D"), "{url}");
    }

    #[test]
    fn test_build_url_needs_every_part() {
        let mut env = concourse_env();
        env.remove("BUILD_TEAM_NAME");
        assert_eq!(context_from(&env).build_url(), None);
    }

    #[test]
    fn test_blank_variables_ignored() {
        let ctx = BuildContext::from_lookup(|key| {
            (key == "BUILD_JOB_NAME").then(|| "  ".to_string())
        });
        assert_eq!(ctx.job_name, None);
        assert_eq!(ctx.job_path(), "unknown");
    }

    #[test]
    fn test_job_path() {
        let ctx = context_from(&concourse_env());
        assert_eq!(ctx.job_path(), "beacon/unit-tests");
    }
}
