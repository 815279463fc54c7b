use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use skew_core::{parse_bool, GroupResource};
use skew_featuregate::lint::{duplicate_keys, verify_alphabetic_order, verify_no_new_unversioned};
use skew_featuregate::FeatureGate;
use skew_lifecycle::{EvaluatorOptions, ResourceEncodingConfig, ResourceExpirationEvaluator};
use skew_registry::config::parse_configuration_map;
use skew_registry::{ComponentGlobalsConfig, VersionKind};
use tracing::{error, info, warn};

mod topology;

use topology::{group_names, unversioned_features, Built, Topology};

#[derive(Parser, Debug)]
#[command(name = "skewctl", version, about = "Resolve component versions, features and served APIs")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Topology file (YAML or JSON)
    #[arg(short = 'f', long = "file", global = true, env = "SKEW_TOPOLOGY")]
    file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Args, Debug, Default)]
struct VersionFlags {
    /// Emulated versions, e.g. "kube=1.31,wardle=1.2"
    #[arg(long = "emulated-version")]
    emulated_version: Option<String>,
    /// Min compatibility versions, e.g. "kube=1.30"
    #[arg(long = "min-compatibility-version")]
    min_compatibility_version: Option<String>,
    /// Feature gates, e.g. "wardle:Banana=true,Watchlist=false"; repeatable
    #[arg(long = "feature-gates", action = ArgAction::Append)]
    feature_gates: Vec<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Resolve and validate every component's versions and features
    Resolve {
        #[command(flatten)]
        flags: VersionFlags,
    },
    /// Print allowed version ranges and known features
    Ranges,
    /// Show served group versions and storage versions for one component
    Serve {
        #[command(flatten)]
        flags: VersionFlags,
        /// Component whose APIs are evaluated (default: the default component)
        #[arg(long = "component")]
        component: Option<String>,
        /// Runtime config overrides, e.g. "apps/v1beta1=false,apps/v1/deployments=true"
        #[arg(long = "runtime-config")]
        runtime_config: Option<String>,
        /// Serve APIs introduced after the emulation version, up to the binary version
        #[arg(long = "emulation-forward-compatible", action = ArgAction::SetTrue)]
        emulation_forward_compatible: bool,
    },
    /// Check feature tables: ordering, duplicates, new unversioned specs
    Lint {
        /// Previous topology; features it lacks must be versioned
        #[arg(long = "baseline")]
        baseline: Option<PathBuf>,
    },
}

fn init_tracing() {
    let env = std::env::var("SKEW_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("SKEW_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid SKEW_METRICS_ADDR; expected host:port");
        }
    }
}

async fn load_topology(path: &Path) -> Result<Topology> {
    let text = tokio::fs::read_to_string(path).await.with_context(|| format!("read {}", path.display()))?;
    Topology::parse(&text).with_context(|| format!("in {}", path.display()))
}

/// Build the registry, apply file config overlaid by flags, then resolve.
fn resolve(topology: &Topology, flags: &VersionFlags) -> Result<Built> {
    let built = topology.build()?;
    let mut config: ComponentGlobalsConfig = topology.config.clone();
    config.merge(ComponentGlobalsConfig::from_flags(
        flags.emulated_version.as_deref(),
        flags.min_compatibility_version.as_deref(),
        &flags.feature_gates,
    )?);
    built.registry.apply_config(&config)?;
    built.registry.set()?;
    Ok(built)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ComponentRow {
    component: String,
    binary: Option<String>,
    emulation: Option<String>,
    min_compatibility: Option<String>,
    emulation_derived: bool,
    min_compatibility_derived: bool,
    features: BTreeMap<String, bool>,
}

fn component_rows(built: &Built) -> Vec<ComponentRow> {
    built
        .registry
        .components()
        .into_iter()
        .filter_map(|c| {
            let ev = built.registry.effective_version_for(&c)?;
            let features = built
                .gates
                .get(&c)
                .map(|g| g.feature_names().into_iter().map(|f| (f.clone(), g.enabled(&f))).collect())
                .unwrap_or_default();
            Some(ComponentRow {
                binary: ev.binary_version().map(|v| v.to_string()),
                emulation: ev.emulation_version().map(|v| v.to_string()),
                min_compatibility: ev.min_compatibility_version().map(|v| v.to_string()),
                emulation_derived: built.registry.is_derived(&c, VersionKind::Emulation),
                min_compatibility_derived: built.registry.is_derived(&c, VersionKind::MinCompatibility),
                features,
                component: c,
            })
        })
        .collect()
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GroupReport {
    group: String,
    served: BTreeMap<String, Vec<String>>,
    removed: Vec<String>,
    storage: BTreeMap<String, String>,
}

fn serve(
    topology: &Topology,
    built: &Built,
    component: &str,
    runtime_config: &BTreeMap<String, bool>,
    forward: bool,
) -> Result<Vec<GroupReport>> {
    let decl = topology.components.get(component).ok_or_else(|| anyhow!("component {} not in topology", component))?;
    let ev = built
        .registry
        .effective_version_for(component)
        .ok_or_else(|| anyhow!("component {} not registered", component))?;
    let emulation = ev.emulation_version().ok_or_else(|| anyhow!("component {} has no emulation version", component))?;

    let source = Arc::new(decl.lifecycle_registry());
    let overrides = decl.resource_config(runtime_config)?;
    let mut options = EvaluatorOptions::from_env()?;
    options.binary_version = ev.binary_version();
    options.emulation_forward_compatible = forward || decl.emulation_forward_compatible;
    let evaluator = ResourceExpirationEvaluator::from_options(&emulation, options);
    let encoding = ResourceEncodingConfig::with_effective_version(source.clone(), &ev);

    let mut reports = Vec::new();
    for group in group_names(decl) {
        let mut storage = BTreeMap::new();
        for g in decl.apis.iter().filter(|g| g.group == group) {
            storage.extend(decl.storage_map(g, &overrides));
        }
        let removed = evaluator.remove_unavailable_kinds(&group, source.as_ref(), &mut storage, Some(&overrides));
        let mut bases: Vec<String> =
            storage.values().flat_map(|rs| rs.keys()).filter(|r| !r.contains('/')).cloned().collect();
        bases.sort();
        bases.dedup();
        let storage_versions = bases
            .into_iter()
            .map(|r| {
                let gr = GroupResource::new(group.clone(), r.clone());
                let chosen = match encoding.storage_encoding_for(&gr) {
                    Ok(gv) => gv.version,
                    Err(e) => {
                        warn!(resource = %gr, error = %e, "no storage version");
                        format!("error: {}", e)
                    }
                };
                (r, chosen)
            })
            .collect();
        reports.push(GroupReport {
            served: storage.into_iter().map(|(v, rs)| (v, rs.into_keys().collect())).collect(),
            removed: removed.iter().map(|gvr| format!("{}/{}", gvr.version, gvr.resource)).collect(),
            storage: storage_versions,
            group,
        });
    }
    Ok(reports)
}

fn lint(topology: &Topology, baseline: Option<&Topology>) -> Vec<String> {
    let mut problems = Vec::new();
    for (component, decl) in &topology.components {
        let names: Vec<&str> = decl.features.iter().map(|f| f.name.as_str()).collect();
        if let Err(e) = verify_alphabetic_order(&names, "") {
            problems.push(format!("{}: {}", component, e));
        }
        let dups = duplicate_keys(&names);
        if !dups.is_empty() {
            problems.push(format!("{}: duplicate feature keys: {:?}", component, dups));
        }
    }
    if let Some(old) = baseline {
        let old = unversioned_features(old);
        for (component, new) in unversioned_features(topology) {
            let before = old.get(&component).cloned().unwrap_or_default();
            if let Err(e) = verify_no_new_unversioned(&before, &new) {
                problems.push(format!("{}: {}", component, e));
            }
        }
    }
    problems
}

/// `group/version[/resource]=bool` pairs from `--runtime-config`.
fn parse_runtime_config(s: &str) -> Result<BTreeMap<String, bool>> {
    parse_configuration_map(s)?
        .into_iter()
        .map(|(k, v)| match parse_bool(&v) {
            Some(b) => Ok((k, b)),
            None => Err(anyhow!("runtime config {}: invalid boolean {:?}", k, v)),
        })
        .collect()
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let path = cli.file.clone().ok_or_else(|| anyhow!("a topology file is required (-f or SKEW_TOPOLOGY)"))?;
    let topology = load_topology(&path).await?;

    match cli.command {
        Commands::Resolve { flags } => {
            info!(file = %path.display(), "resolve invoked");
            let built = resolve(&topology, &flags)?;
            let errs = built.registry.validate();
            let rows = component_rows(&built);
            match cli.output {
                Output::Human => {
                    println!("{:<16} {:<10} {:<10} {:<10} FEATURES", "COMPONENT", "BINARY", "EMULATION", "MINCOMPAT");
                    for r in &rows {
                        let mark = |v: &Option<String>, derived: bool| {
                            let s = v.clone().unwrap_or_else(|| "-".to_string());
                            if derived { format!("{}*", s) } else { s }
                        };
                        let features: Vec<String> = r.features.iter().map(|(f, on)| format!("{}={}", f, on)).collect();
                        println!(
                            "{:<16} {:<10} {:<10} {:<10} {}",
                            r.component,
                            r.binary.clone().unwrap_or_else(|| "-".to_string()),
                            mark(&r.emulation, r.emulation_derived),
                            mark(&r.min_compatibility, r.min_compatibility_derived),
                            features.join(",")
                        );
                    }
                }
                Output::Json => {
                    #[derive(Serialize)]
                    struct Resolved<'a> { components: &'a [ComponentRow], errors: Vec<String> }
                    print_json(&Resolved { components: &rows, errors: errs.iter().map(|e| e.to_string()).collect() })?;
                }
            }
            if !errs.is_empty() {
                for e in &errs {
                    error!(error = %e, "validation failed");
                    eprintln!("invalid: {}", e);
                }
                bail!("{} validation error(s)", errs.len());
            }
        }
        Commands::Ranges => {
            let built = topology.build()?;
            let emulation = built.registry.emulation_version_options();
            let min_compat = built.registry.min_compatibility_version_options();
            let features = built.registry.known_features();
            match cli.output {
                Output::Human => {
                    println!("emulated-version:");
                    for o in &emulation { println!("  {}", o); }
                    println!("min-compatibility-version:");
                    for o in &min_compat { println!("  {}", o); }
                    println!("feature-gates:");
                    for f in &features { println!("  {}", f); }
                }
                Output::Json => {
                    #[derive(Serialize)]
                    #[serde(rename_all = "camelCase")]
                    struct Ranges { emulated_version: Vec<String>, min_compatibility_version: Vec<String>, feature_gates: Vec<String> }
                    print_json(&Ranges { emulated_version: emulation, min_compatibility_version: min_compat, feature_gates: features })?;
                }
            }
        }
        Commands::Serve { flags, component, runtime_config, emulation_forward_compatible } => {
            let built = resolve(&topology, &flags)?;
            let component = component.unwrap_or_else(|| built.registry.default_component().to_string());
            info!(component = %component, "serve invoked");
            let runtime = match runtime_config.as_deref() {
                Some(s) => parse_runtime_config(s)?,
                None => BTreeMap::new(),
            };
            let reports = serve(&topology, &built, &component, &runtime, emulation_forward_compatible)?;
            match cli.output {
                Output::Human => {
                    for g in &reports {
                        let name = if g.group.is_empty() { "core" } else { g.group.as_str() };
                        println!("{}:", name);
                        for (version, resources) in &g.served {
                            println!("  {:<12} {}", version, resources.join(", "));
                        }
                        for (resource, version) in &g.storage {
                            println!("  storage {} -> {}", resource, version);
                        }
                        if !g.removed.is_empty() {
                            println!("  removed {}", g.removed.join(", "));
                        }
                    }
                }
                Output::Json => print_json(&reports)?,
            }
        }
        Commands::Lint { baseline } => {
            let baseline = match baseline {
                Some(p) => Some(load_topology(&p).await?),
                None => None,
            };
            let problems = lint(&topology, baseline.as_ref());
            match cli.output {
                Output::Human => {
                    for p in &problems { println!("{}", p); }
                }
                Output::Json => print_json(&problems)?,
            }
            if !problems.is_empty() {
                bail!("{} feature table problem(s)", problems.len());
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEMO: &str = include_str!("../../../demos/topology.yaml");

    fn group<'a>(reports: &'a [GroupReport], name: &str) -> &'a GroupReport {
        reports.iter().find(|g| g.group == name).unwrap()
    }

    #[test]
    fn demo_resolves_and_validates() {
        let topo = Topology::parse(DEMO).unwrap();
        let built = resolve(&topo, &VersionFlags::default()).unwrap();
        assert!(built.registry.validate().is_empty());
        let rows = component_rows(&built);
        let wardle = rows.iter().find(|r| r.component == "wardle").unwrap();
        assert_eq!(wardle.emulation.as_deref(), Some("1.4"));
        assert!(wardle.emulation_derived);
        assert_eq!(wardle.features.get("BanFlunder"), Some(&true));
    }

    #[test]
    fn serve_at_binary_version() {
        let topo = Topology::parse(DEMO).unwrap();
        let built = resolve(&topo, &VersionFlags::default()).unwrap();
        let reports = serve(&topo, &built, "kube", &BTreeMap::new(), false).unwrap();

        let flow = group(&reports, "flowcontrol.apiserver.k8s.io");
        assert_eq!(flow.served.keys().collect::<Vec<_>>(), vec!["v1"]);
        assert_eq!(flow.removed, vec!["v1beta3/flowschemas", "v1beta3/flowschemas/status"]);
        assert_eq!(flow.storage["flowschemas"], "v1");

        let dra = group(&reports, "resource.k8s.io");
        assert_eq!(dra.served.len(), 3);
        assert_eq!(dra.storage["deviceclasses"], "v1beta2");
    }

    #[test]
    fn serve_while_emulating_previous_release() {
        let topo = Topology::parse(DEMO).unwrap();
        let flags = VersionFlags { emulated_version: Some("kube=1.33".into()), ..Default::default() };
        let built = resolve(&topo, &flags).unwrap();
        assert_eq!(
            built.registry.effective_version_for("wardle").unwrap().min_compatibility_version(),
            Some(skew_core::Version::major_minor(1, 2))
        );

        let reports = serve(&topo, &built, "kube", &BTreeMap::new(), false).unwrap();
        let dra = group(&reports, "resource.k8s.io");
        assert_eq!(dra.served.keys().collect::<Vec<_>>(), vec!["v1beta1", "v1beta2"]);
        assert_eq!(dra.storage["deviceclasses"], "v1beta1");

        let reports = serve(&topo, &built, "kube", &BTreeMap::new(), true).unwrap();
        assert!(group(&reports, "resource.k8s.io").served.contains_key("v1"));

        let off = BTreeMap::from([("resource.k8s.io/v1beta1".to_string(), false)]);
        let reports = serve(&topo, &built, "kube", &off, true).unwrap();
        let dra = group(&reports, "resource.k8s.io");
        assert!(!dra.served.contains_key("v1beta1"));
        assert!(dra.served.contains_key("v1"));
    }

    #[test]
    fn runtime_config_accepts_flag_booleans() {
        let parsed = parse_runtime_config("resource.k8s.io/v1beta1=0, api/v1=T,flowcontrol.apiserver.k8s.io/v1=True").unwrap();
        assert_eq!(
            parsed,
            BTreeMap::from([
                ("api/v1".to_string(), true),
                ("flowcontrol.apiserver.k8s.io/v1".to_string(), true),
                ("resource.k8s.io/v1beta1".to_string(), false),
            ])
        );
        let err = parse_runtime_config("api/v1=yes").unwrap_err();
        assert!(err.to_string().contains("invalid boolean"), "{}", err);
    }

    #[test]
    fn lint_reports_new_unversioned_features() {
        let topo = Topology::parse(DEMO).unwrap();
        assert!(lint(&topo, None).is_empty());
        let problems = lint(&topo, Some(&Topology::default()));
        assert_eq!(problems.len(), 1);
        assert!(problems[0].starts_with("kube: new features added as unversioned specs"), "{}", problems[0]);

        let unsorted = Topology::parse(
            r#"
components:
  a:
    binaryVersion: "1.0.0"
    features:
      - name: Zeta
        spec: { default: false, preRelease: ALPHA }
      - name: Alpha
        spec: { default: false, preRelease: ALPHA }
      - name: Alpha
        spec: { default: false, preRelease: ALPHA }
"#,
        )
        .unwrap();
        assert_eq!(lint(&unsorted, None).len(), 2);
    }
}
