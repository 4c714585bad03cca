use std::error::Error;
use std::process::{Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

/// Returns true if the given binary is accessible in PATH.
fn tool_available(binary: &str) -> bool {
    Command::new(binary)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok()
}

const TEST_NAMESPACE: &str = "mongo-e2e";
const REPLICA_SET: &str = "rs0";
const STATEFULSET: &str = "db";
const SELECTOR: &str = "app=mongodb-replicaset";
const ROLE_LABEL: &str = "redmart.com/mongo-role";

// ---------------------------------------------------------------------------
// E2E labeling test
//
// Deploys a three-member replica set and the labeler on a Kind cluster and
// waits for exactly one pod to be labeled primary.
// Run with: E2E_LABELER_IMAGE=mongo-labeler:e2e cargo test --test e2e_kind -- --ignored
// ---------------------------------------------------------------------------

/// 1. Start (or reuse) a Kind cluster.
/// 2. Deploy a three-member MongoDB StatefulSet and initiate the replica set.
/// 3. Deploy the labeler with RBAC to list and patch pods.
/// 4. Wait for one `primary` and two `secondary` role labels.
/// 5. Step the primary down and wait for the labels to follow.
#[test]
#[ignore]
fn e2e_replica_set_roles_are_labeled() -> Result<(), Box<dyn Error>> {
    for tool in &["kind", "kubectl"] {
        if !tool_available(tool) {
            eprintln!("Skipping e2e test: `{tool}` not found in PATH.");
            return Ok(());
        }
    }
    let image = match std::env::var("E2E_LABELER_IMAGE") {
        Ok(image) => image,
        Err(_) => {
            eprintln!("Skipping e2e test: E2E_LABELER_IMAGE not set.");
            return Ok(());
        }
    };

    let cluster_name = std::env::var("KIND_CLUSTER_NAME").unwrap_or_else(|_| "mongo-e2e".into());
    ensure_kind_cluster(&cluster_name)?;
    if env_true("E2E_LOAD_IMAGE", true) {
        run_cmd(
            "kind",
            &["load", "docker-image", &image, "--name", &cluster_name],
        )?;
    }

    let _cleanup = E2eCleanup;
    run_cmd_quiet("kubectl", &["create", "namespace", TEST_NAMESPACE])?;

    // ── Replica set ──────────────────────────────────────────────────────────
    kubectl_apply(&replica_set_manifest())?;
    run_cmd(
        "kubectl",
        &[
            "rollout",
            "status",
            &format!("statefulset/{STATEFULSET}"),
            "-n",
            TEST_NAMESPACE,
            "--timeout=300s",
        ],
    )?;
    initiate_replica_set()?;

    // ── Labeler ──────────────────────────────────────────────────────────────
    kubectl_apply(&labeler_manifest(&image))?;

    wait_for("one primary and two secondaries", Duration::from_secs(180), || {
        let roles = pod_roles()?;
        Ok(count(&roles, "primary") == 1 && count(&roles, "secondary") == 2)
    })?;

    // ── Failover ─────────────────────────────────────────────────────────────
    let roles = pod_roles()?;
    let old_primary = roles
        .iter()
        .find(|(_, role)| role == "primary")
        .map(|(pod, _)| pod.clone())
        .ok_or("no primary labeled")?;

    // stepDown closes the connection, so the exec exit status is ignored.
    run_cmd_quiet(
        "kubectl",
        &[
            "exec",
            "-n",
            TEST_NAMESPACE,
            &old_primary,
            "--",
            "mongosh",
            "--quiet",
            "--eval",
            "rs.stepDown(60)",
        ],
    )?;

    wait_for("primary label moved", Duration::from_secs(180), || {
        let roles = pod_roles()?;
        let new_primary = roles.iter().find(|(_, role)| role == "primary");
        Ok(count(&roles, "primary") == 1
            && new_primary.map(|(pod, _)| pod != &old_primary).unwrap_or(false))
    })?;

    Ok(())
}

/// `(pod name, role label)` for every replica set pod
fn pod_roles() -> Result<Vec<(String, String)>, Box<dyn Error>> {
    let jsonpath = format!(
        "jsonpath={{range .items[*]}}{{.metadata.name}}={{.metadata.labels.{}}}{{\"\\n\"}}{{end}}",
        ROLE_LABEL.replace('.', "\\.")
    );
    let out = run_cmd(
        "kubectl",
        &["get", "pods", "-n", TEST_NAMESPACE, "-l", SELECTOR, "-o", &jsonpath],
    )?;
    Ok(out
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(pod, role)| (pod.to_string(), role.to_string()))
        .collect())
}

fn count(roles: &[(String, String)], role: &str) -> usize {
    roles.iter().filter(|(_, r)| r == role).count()
}

fn initiate_replica_set() -> Result<(), Box<dyn Error>> {
    let members = (0..3)
        .map(|i| {
            format!(
                "{{ _id: {i}, host: '{STATEFULSET}-{i}.{STATEFULSET}.{TEST_NAMESPACE}:27017' }}"
            )
        })
        .collect::<Vec<_>>()
        .join(", ");
    let script = format!("rs.initiate({{ _id: '{REPLICA_SET}', members: [{members}] }})");

    wait_for("replica set initiated", Duration::from_secs(120), || {
        Ok(run_cmd(
            "kubectl",
            &[
                "exec",
                "-n",
                TEST_NAMESPACE,
                &format!("{STATEFULSET}-0"),
                "--",
                "mongosh",
                "--quiet",
                "--eval",
                &script,
            ],
        )
        .is_ok())
    })
}

struct E2eCleanup;

impl Drop for E2eCleanup {
    fn drop(&mut self) {
        if env_true("E2E_KEEP_RESOURCES", false) {
            return;
        }
        let _ = run_cmd_quiet(
            "kubectl",
            &["delete", "namespace", TEST_NAMESPACE, "--wait=false"],
        );
    }
}

fn ensure_kind_cluster(name: &str) -> Result<(), Box<dyn Error>> {
    let clusters = run_cmd("kind", &["get", "clusters"])?;
    if clusters.lines().any(|line| line.trim() == name) {
        return Ok(());
    }
    run_cmd("kind", &["create", "cluster", "--name", name])?;
    Ok(())
}

fn kubectl_apply(manifest: &str) -> Result<(), Box<dyn Error>> {
    run_cmd_with_stdin("kubectl", &["apply", "-f", "-"], manifest)?;
    Ok(())
}

fn run_cmd(program: &str, args: &[&str]) -> Result<String, Box<dyn Error>> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Ok(kubeconfig) = std::env::var("KUBECONFIG") {
        cmd.env("KUBECONFIG", kubeconfig);
    }
    let output = cmd.output()?;
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!(
            "command failed: {} {:?}\nstdout:\n{}\nstderr:\n{}",
            program, args, stdout, stderr
        )
        .into());
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn run_cmd_quiet(program: &str, args: &[&str]) -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Ok(kubeconfig) = std::env::var("KUBECONFIG") {
        cmd.env("KUBECONFIG", kubeconfig);
    }
    let _ = cmd.output();
    Ok(())
}

fn run_cmd_with_stdin(program: &str, args: &[&str], input: &str) -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Ok(kubeconfig) = std::env::var("KUBECONFIG") {
        cmd.env("KUBECONFIG", kubeconfig);
    }
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    if let Some(mut stdin) = child.stdin.take() {
        use std::io::Write;
        stdin.write_all(input.as_bytes())?;
        stdin.flush()?;
        drop(stdin);
    }
    let output = child.wait_with_output()?;
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!(
            "command failed: {} {:?}\nstdout:\n{}\nstderr:\n{}",
            program, args, stdout, stderr
        )
        .into());
    }
    Ok(())
}

fn wait_for<F>(label: &str, timeout: Duration, mut condition: F) -> Result<(), Box<dyn Error>>
where
    F: FnMut() -> Result<bool, Box<dyn Error>>,
{
    let start = Instant::now();
    let mut attempts: u32 = 0;
    loop {
        if condition()? {
            return Ok(());
        }
        attempts += 1;
        if start.elapsed() > timeout {
            return Err(format!(
                "timeout while waiting for {} after {:?} (attempts={})",
                label, timeout, attempts
            )
            .into());
        }
        sleep(Duration::from_secs(3));
    }
}

fn env_true(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => matches!(
            value.to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

fn replica_set_manifest() -> String {
    format!(
        r#"---
apiVersion: v1
kind: Service
metadata:
  name: {sts}
  namespace: {ns}
spec:
  clusterIP: None
  publishNotReadyAddresses: true
  selector:
    app: mongodb-replicaset
  ports:
    - name: mongodb
      port: 27017
---
apiVersion: apps/v1
kind: StatefulSet
metadata:
  name: {sts}
  namespace: {ns}
spec:
  serviceName: {sts}
  replicas: 3
  selector:
    matchLabels:
      app: mongodb-replicaset
  template:
    metadata:
      labels:
        app: mongodb-replicaset
    spec:
      containers:
        - name: mongodb
          image: mongo:6.0
          args: ["--replSet", "{rs}", "--bind_ip_all"]
          ports:
            - containerPort: 27017
"#,
        sts = STATEFULSET,
        ns = TEST_NAMESPACE,
        rs = REPLICA_SET,
    )
}

fn labeler_manifest(image: &str) -> String {
    format!(
        r#"---
apiVersion: v1
kind: ServiceAccount
metadata:
  name: mongo-labeler
  namespace: {ns}
---
apiVersion: rbac.authorization.k8s.io/v1
kind: Role
metadata:
  name: mongo-labeler
  namespace: {ns}
rules:
  - apiGroups: [""]
    resources: ["pods"]
    verbs: ["get", "list", "patch"]
---
apiVersion: rbac.authorization.k8s.io/v1
kind: RoleBinding
metadata:
  name: mongo-labeler
  namespace: {ns}
roleRef:
  apiGroup: rbac.authorization.k8s.io
  kind: Role
  name: mongo-labeler
subjects:
  - kind: ServiceAccount
    name: mongo-labeler
    namespace: {ns}
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: mongo-labeler
  namespace: {ns}
spec:
  replicas: 1
  selector:
    matchLabels:
      app: mongo-labeler
  template:
    metadata:
      labels:
        app: mongo-labeler
    spec:
      serviceAccountName: mongo-labeler
      containers:
        - name: labeler
          image: {image}
          imagePullPolicy: IfNotPresent
          args:
            - --namespace={ns}
            - --pod-selector={selector}
            - --update-period=5
            - --verbose
"#,
        ns = TEST_NAMESPACE,
        image = image,
        selector = SELECTOR,
    )
}
