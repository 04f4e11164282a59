use super::{
    AGENT_CONTAINER, INPUT_PATH, INPUT_VOLUME, IPC_PATH, IPC_VOLUME, MEMORY_PATH, MEMORY_VOLUME,
    RELAY_CONTAINER, SANDBOX_CONTAINER, SKILLS_PATH, SKILLS_VOLUME, TMP_PATH, TMP_VOLUME,
    WORKSPACE_PATH, WORKSPACE_VOLUME,
};
use crate::config::WorkloadConfig;
use crate::resources::{
    AgentRun, LABEL_AGENT_RUN, LABEL_INSTANCE, LABEL_ROLE, LABEL_SANDBOX, Object, ObjectMetaExt,
    PolicySpec, ROLE_AGENT_RUN, memory_config_map_name, object_meta,
};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::ConfigMap;
use serde_json::{Value, json};
use std::collections::BTreeMap;

/// Inputs read by the caller immediately before building.
#[derive(Debug, Clone, Copy)]
pub struct BuildContext<'a> {
    pub config: &'a WorkloadConfig,
    pub policy: Option<&'a PolicySpec>,
    pub memory_enabled: bool,
}

pub fn job_name(run: &AgentRun) -> String {
    format!("{}-agent", run.name())
}

pub fn input_config_map_name(run: &AgentRun) -> String {
    format!("{}-input", run.name())
}

/// The auxiliary config object carrying the task text and prompt.
pub fn build_input_config_map(run: &AgentRun) -> ConfigMap {
    let mut data = BTreeMap::from([("task".to_string(), run.spec.task.clone())]);
    if let Some(prompt) = &run.spec.system_prompt {
        data.insert("system-prompt".into(), prompt.clone());
    }

    let mut metadata = object_meta(run.namespace(), &input_config_map_name(run))
        .with_label(LABEL_AGENT_RUN, run.name());
    metadata.owner_references = Some(vec![run.controller_owner_ref()]);
    ConfigMap {
        metadata,
        data: Some(data),
        ..ConfigMap::default()
    }
}

pub fn build_job(run: &AgentRun, ctx: &BuildContext<'_>) -> Result<Job, serde_json::Error> {
    let labels = pod_labels(run);

    let mut containers = vec![agent_container(run, ctx), relay_container(ctx.config)];
    if run.spec.sandbox_enabled() {
        containers.push(sandbox_container(run, ctx));
    }

    let job = json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": {
            "name": job_name(run),
            "namespace": run.namespace(),
            "labels": labels,
            "ownerReferences": [run.controller_owner_ref()]
        },
        "spec": {
            "ttlSecondsAfterFinished": ctx.config.ttl_seconds_after_finished,
            "activeDeadlineSeconds": active_deadline_secs(run, ctx.config),
            "backoffLimit": 0,
            "template": {
                "metadata": { "labels": labels },
                "spec": {
                    "serviceAccountName": ctx.config.service_account,
                    "automountServiceAccountToken": false,
                    "restartPolicy": "Never",
                    "securityContext": {
                        "runAsNonRoot": true,
                        "runAsUser": ctx.config.run_as_user,
                        "runAsGroup": ctx.config.run_as_group,
                        "fsGroup": ctx.config.run_as_group
                    },
                    "containers": containers,
                    "volumes": volumes(run, ctx.memory_enabled)
                }
            }
        }
    });

    serde_json::from_value(job)
}

fn pod_labels(run: &AgentRun) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::from([
        (LABEL_AGENT_RUN.to_string(), run.name().to_string()),
        (LABEL_INSTANCE.to_string(), run.spec.instance_ref.clone()),
        (LABEL_ROLE.to_string(), ROLE_AGENT_RUN.to_string()),
    ]);
    if run.spec.sandbox_enabled() {
        labels.insert(LABEL_SANDBOX.into(), "true".into());
    }
    labels
}

/// Run timeout plus grace, clamped to what the workload API can carry.
fn active_deadline_secs(run: &AgentRun, config: &WorkloadConfig) -> i64 {
    // An unparseable timeout never reaches the builder; admission and the
    // reconciler both reject it first.
    let secs = match run.spec.timeout_duration() {
        Ok(Some(timeout)) => timeout.as_secs().saturating_add(config.deadline_grace_secs),
        _ => config.default_deadline_secs,
    };
    i64::try_from(secs).unwrap_or(i64::MAX)
}

fn restricted_security_context() -> Value {
    json!({
        "runAsNonRoot": true,
        "allowPrivilegeEscalation": false,
        "readOnlyRootFilesystem": true,
        "capabilities": { "drop": ["ALL"] }
    })
}

fn env(name: &str, value: &str) -> Value {
    json!({ "name": name, "value": value })
}

fn mount(name: &str, path: &str, read_only: bool) -> Value {
    json!({ "name": name, "mountPath": path, "readOnly": read_only })
}

fn agent_container(run: &AgentRun, ctx: &BuildContext<'_>) -> Value {
    let spec = &run.spec;
    let mut envs = vec![
        env("AGENT_RUN_NAME", run.name()),
        env("AGENT_INSTANCE", &spec.instance_ref),
        env("AGENT_ID", &spec.agent_id),
        env("AGENT_SESSION_KEY", &spec.session_key),
        env("AGENT_TASK", &spec.task),
        env("AGENT_MODEL_PROVIDER", &spec.model.provider),
        env("AGENT_MODEL", &spec.model.model),
        env("AGENT_WORKSPACE", WORKSPACE_PATH),
        env("AGENT_IPC_DIR", IPC_PATH),
        env("AGENT_SKILLS_DIR", SKILLS_PATH),
        env("AGENT_INPUT_DIR", INPUT_PATH),
    ];
    if let Some(prompt) = &spec.system_prompt {
        envs.push(env("AGENT_SYSTEM_PROMPT", prompt));
    }
    if let Some(base_url) = &spec.model.base_url {
        envs.push(env("AGENT_MODEL_BASE_URL", base_url));
    }
    if let Some(parent) = &spec.parent {
        envs.push(env("AGENT_PARENT_RUN", &parent.run_name));
        envs.push(env("AGENT_PARENT_SESSION_KEY", &parent.session_key));
        envs.push(env("AGENT_SPAWN_DEPTH", &parent.spawn_depth.to_string()));
    }
    if let Some(tools) = &spec.tool_policy {
        if !tools.allow.is_empty() {
            envs.push(env("AGENT_TOOLS_ALLOW", &tools.allow.join(",")));
        }
        if !tools.deny.is_empty() {
            envs.push(env("AGENT_TOOLS_DENY", &tools.deny.join(",")));
        }
    }
    if spec.sandbox_enabled() {
        envs.push(env("SANDBOX_ENABLED", "true"));
    }

    let mut volume_mounts = vec![
        mount(WORKSPACE_VOLUME, WORKSPACE_PATH, false),
        mount(IPC_VOLUME, IPC_PATH, false),
        mount(TMP_VOLUME, TMP_PATH, false),
        mount(SKILLS_VOLUME, SKILLS_PATH, true),
        mount(INPUT_VOLUME, INPUT_PATH, true),
    ];
    if ctx.memory_enabled {
        envs.push(env("MEMORY_ENABLED", "true"));
        envs.push(env("AGENT_MEMORY_DIR", MEMORY_PATH));
        volume_mounts.push(mount(MEMORY_VOLUME, MEMORY_PATH, true));
    }

    let env_from: Vec<Value> = spec
        .model
        .auth_secret_ref
        .iter()
        .filter(|name| !name.is_empty())
        .map(|name| json!({ "secretRef": { "name": name } }))
        .collect();

    json!({
        "name": AGENT_CONTAINER,
        "image": ctx.config.agent_image,
        "imagePullPolicy": "IfNotPresent",
        "env": envs,
        "envFrom": env_from,
        "volumeMounts": volume_mounts,
        "securityContext": restricted_security_context()
    })
}

fn relay_container(config: &WorkloadConfig) -> Value {
    json!({
        "name": RELAY_CONTAINER,
        "image": config.relay_image,
        "imagePullPolicy": "IfNotPresent",
        "env": [env("IPC_DIR", IPC_PATH)],
        "volumeMounts": [mount(IPC_VOLUME, IPC_PATH, false)],
        "securityContext": restricted_security_context()
    })
}

fn sandbox_container(run: &AgentRun, ctx: &BuildContext<'_>) -> Value {
    let image = run
        .spec
        .sandbox
        .as_ref()
        .and_then(|sandbox| sandbox.image.clone())
        .filter(|image| !image.is_empty())
        .or_else(|| {
            ctx.policy
                .and_then(PolicySpec::default_sandbox_image)
                .map(str::to_string)
        })
        .unwrap_or_else(|| ctx.config.sandbox_image.clone());

    let mut container = json!({
        "name": SANDBOX_CONTAINER,
        "image": image,
        "imagePullPolicy": "IfNotPresent",
        "command": ["sleep", "infinity"],
        "volumeMounts": [
            mount(WORKSPACE_VOLUME, WORKSPACE_PATH, false),
            mount(TMP_VOLUME, TMP_PATH, false)
        ],
        "securityContext": restricted_security_context()
    });

    let mut limits = BTreeMap::new();
    if let Some(sandbox) = ctx.policy.and_then(|policy| policy.sandbox_policy.as_ref()) {
        if let Some(cpu) = &sandbox.max_cpu {
            limits.insert("cpu", cpu.clone());
        }
        if let Some(memory) = &sandbox.max_memory {
            limits.insert("memory", memory.clone());
        }
    }
    if !limits.is_empty() {
        container["resources"] = json!({ "limits": limits });
    }
    container
}

fn empty_dir(name: &str, medium: Option<&str>) -> Value {
    match medium {
        Some(medium) => json!({ "name": name, "emptyDir": { "medium": medium } }),
        None => json!({ "name": name, "emptyDir": {} }),
    }
}

fn config_map_volume(name: &str, config_map: &str) -> Value {
    json!({ "name": name, "configMap": { "name": config_map } })
}

fn volumes(run: &AgentRun, memory_enabled: bool) -> Vec<Value> {
    let mut volumes = vec![
        empty_dir(WORKSPACE_VOLUME, None),
        empty_dir(IPC_VOLUME, Some("Memory")),
        empty_dir(TMP_VOLUME, None),
        skills_volume(run),
        config_map_volume(INPUT_VOLUME, &input_config_map_name(run)),
    ];
    if memory_enabled {
        volumes.push(config_map_volume(
            MEMORY_VOLUME,
            &memory_config_map_name(&run.spec.instance_ref),
        ));
    }
    volumes
}

/// One projected volume over every skill, or an empty dir when there are none.
fn skills_volume(run: &AgentRun) -> Value {
    if run.spec.skills.is_empty() {
        return empty_dir(SKILLS_VOLUME, None);
    }
    let sources: Vec<Value> = run
        .spec
        .skills
        .iter()
        .map(|skill| json!({ "configMap": { "name": skill.config_map_ref } }))
        .collect();
    json!({ "name": SKILLS_VOLUME, "projected": { "sources": sources } })
}
