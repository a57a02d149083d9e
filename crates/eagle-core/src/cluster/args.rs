//! `kubectl` argument builders. Context selection is added by the client.

use std::collections::BTreeMap;
use std::path::Path;

fn v(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn with_dry_run(mut args: Vec<String>, dry_run: bool) -> Vec<String> {
    if dry_run {
        args.push("--dry-run=client".to_string());
    }
    args
}

pub fn apply_file(manifest: &Path, namespace: &str, dry_run: bool) -> Vec<String> {
    let path = manifest.to_string_lossy();
    with_dry_run(v(&["apply", "-n", namespace, "-f", &path]), dry_run)
}

pub fn apply_stdin(namespace: &str, dry_run: bool) -> Vec<String> {
    with_dry_run(v(&["apply", "-n", namespace, "-f", "-"]), dry_run)
}

/// Prints `Active`/`Terminating`, or nothing (exit 0) when the namespace
/// does not exist.
pub fn namespace_phase(namespace: &str) -> Vec<String> {
    v(&[
        "get",
        "namespace",
        namespace,
        "--ignore-not-found",
        "-o",
        "jsonpath={.status.phase}",
    ])
}

pub fn create_namespace(namespace: &str, dry_run: bool) -> Vec<String> {
    with_dry_run(v(&["create", "namespace", namespace]), dry_run)
}

pub fn delete_namespace(namespace: &str, dry_run: bool) -> Vec<String> {
    with_dry_run(
        v(&[
            "delete",
            "namespace",
            namespace,
            "--ignore-not-found",
            "--wait=false",
        ]),
        dry_run,
    )
}

pub fn rollout_status(resource: &str, namespace: &str) -> Vec<String> {
    v(&[
        "rollout",
        "status",
        resource,
        "-n",
        namespace,
        "--timeout=5s",
    ])
}

pub fn pods_ready(selector: &str, namespace: &str) -> Vec<String> {
    v(&[
        "wait",
        "--for=condition=Ready",
        "pod",
        "-l",
        selector,
        "-n",
        namespace,
        "--timeout=5s",
    ])
}

pub fn pod_phase(pod: &str, namespace: &str) -> Vec<String> {
    v(&[
        "get",
        "pod",
        pod,
        "-n",
        namespace,
        "-o",
        "jsonpath={.status.phase}",
    ])
}

pub fn exec(resource: &str, namespace: &str, command: &[String]) -> Vec<String> {
    let mut args = v(&["exec", resource, "-n", namespace, "--"]);
    args.extend(command.iter().cloned());
    args
}

pub fn scale(deployment: &str, replicas: u32, namespace: &str, dry_run: bool) -> Vec<String> {
    let target = format!("deployment/{deployment}");
    let count = format!("--replicas={replicas}");
    with_dry_run(v(&["scale", &target, &count, "-n", namespace]), dry_run)
}

pub const TRANSIENT_LABEL: &str = "eagle.io/transient=probe";

pub fn run_probe(name: &str, image: &str, command: &[String], namespace: &str) -> Vec<String> {
    let image = format!("--image={image}");
    let labels = format!("--labels={TRANSIENT_LABEL}");
    let mut args = v(&[
        "run",
        name,
        "-n",
        namespace,
        &image,
        "--restart=Never",
        &labels,
        "--command",
        "--",
    ]);
    args.extend(command.iter().cloned());
    args
}

pub fn delete_pod(name: &str, namespace: &str) -> Vec<String> {
    v(&[
        "delete",
        "pod",
        name,
        "-n",
        namespace,
        "--ignore-not-found",
    ])
}

/// Opaque Secret manifest using `stringData`, suitable for `apply -f -`.
/// JSON is valid manifest input, so no YAML emitter is needed.
pub fn secret_manifest(name: &str, namespace: &str, data: &BTreeMap<String, String>) -> String {
    serde_json::json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "type": "Opaque",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "labels": { "app.kubernetes.io/managed-by": "eagle-deploy" },
        },
        "stringData": data,
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_adds_client_dry_run() {
        let args = apply_file(Path::new("k8s/services"), "eagle", true);
        assert_eq!(
            args,
            vec!["apply", "-n", "eagle", "-f", "k8s/services", "--dry-run=client"]
        );
        let args = apply_file(Path::new("k8s/services"), "eagle", false);
        assert!(!args.iter().any(|a| a.starts_with("--dry-run")));
    }

    #[test]
    fn probe_pod_is_labelled_transient() {
        let args = run_probe(
            "probe",
            "busybox:1.36",
            &["sh".to_string(), "-c".to_string(), "true".to_string()],
            "eagle",
        );
        assert!(args.contains(&"--labels=eagle.io/transient=probe".to_string()));
        assert_eq!(&args[args.len() - 3..], &["sh", "-c", "true"]);
    }

    #[test]
    fn secret_manifest_carries_string_data() {
        let data = BTreeMap::from([("password".to_string(), "s3cr3t".to_string())]);
        let manifest = secret_manifest("db", "eagle", &data);
        let parsed: serde_json::Value = serde_json::from_str(&manifest).unwrap();
        assert_eq!(parsed["kind"], "Secret");
        assert_eq!(parsed["metadata"]["namespace"], "eagle");
        assert_eq!(parsed["stringData"]["password"], "s3cr3t");
    }

    #[test]
    fn scale_targets_deployment() {
        assert_eq!(
            scale("api-gateway", 3, "eagle", false),
            vec!["scale", "deployment/api-gateway", "--replicas=3", "-n", "eagle"]
        );
    }
}
