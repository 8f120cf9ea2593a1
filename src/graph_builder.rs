/*!
# Stage graph builder
Converts a validated [`RunConfig`] and the resolved run entries into a [`StageGraph`], the DAG of external tool invocations the scheduler executes.

The graph is assembled phase by phase, so every node is only ever added after all of its upstream nodes:
1. shared reference preparation (indexes, sequence dictionary, call regions, microsatellite sites)
2. per-sample canonicalization into an indexed CRAM (or a pass-through of a supplied alignment)
3. per-caller variant calling, with multi-step tools expanded into short chains
4. QC collection on the canonical alignments and caller outputs, then VCF normalization and annotation

## Example usage
```rust
use vcline::graph_builder::{build_stage_graph, GraphConfigBuilder};
use vcline::parsing::run_config::parse_run_config;
use vcline::parsing::sample_resolver::resolve_run_entries;

let config = parse_run_config("
reference_version: hg38
callers:
  somatic_snv_indel:
    gatk: true
resources:
  reference_fa: /ref/genome.fa
  gnomad_vcf: /ref/gnomad.vcf.gz
  evaluation_interval: /ref/calling.interval_list
runs:
  - tumor:
      cram: /data/T1.cram
    normal:
      cram: /data/N1.cram
", None).unwrap();
let resolved = resolve_run_entries(config.runs()).unwrap();
let graph_config = GraphConfigBuilder::default()
    .dest_dir("/out".into())
    .threads(8)
    .workers(2)
    .build().unwrap();
let graph = build_stage_graph(&config, &resolved.entries, &graph_config).unwrap();

// three reference nodes, two pass-through alignments, six Mutect2 steps, and VCF normalization
assert_eq!(graph.len(), 12);
assert_eq!(graph.caller_targets().len(), 1);
```
*/
use derive_builder::Builder;
use indexmap::IndexMap;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::data_types::callers::{Annotator, Caller, MetricsCollector, ResourceKey, BQSR_KNOWN_SITES};
use crate::data_types::sample::{InputKind, RunEntry, SampleRole, SampleUnit};
use crate::data_types::stage_node::{NodeId, StageAction, StageKind, StageNode, ToolInvocation};
use crate::parsing::run_config::RunConfig;

/// Folder name for shared reference artifacts, also the node id prefix of shared nodes
pub const REFERENCE_FOLDER: &str = "reference";

/// Controls how the graph lays out outputs and sizes each tool
#[derive(Builder, Clone, Debug, Default)]
#[builder(default)]
pub struct GraphConfig {
    /// Root output folder; each run entry gets its own sub-folder
    dest_dir: PathBuf,
    /// Total CPU budget
    threads: usize,
    /// Number of nodes that may run at once
    workers: usize,
    /// Memory budget per node in MB, 0 leaves tool defaults alone
    memory_mb: u64,
    /// If true, only reference preparation is emitted
    reference_only: bool
}

impl GraphConfig {
    /// CPUs handed to each tool node
    pub fn cpus_per_node(&self) -> usize {
        (self.threads / self.workers.max(1)).max(1)
    }

    // getters
    pub fn dest_dir(&self) -> &Path {
        &self.dest_dir
    }

    pub fn memory_mb(&self) -> u64 {
        self.memory_mb
    }

    pub fn reference_only(&self) -> bool {
        self.reference_only
    }
}

#[derive(thiserror::Error, Debug, Eq, PartialEq)]
pub enum GraphError {
    #[error("{entry_id}: {caller} requires a matched tumor/normal pair")]
    UnpairedSomaticCaller { entry_id: String, caller: Caller },
    #[error("annotators.{annotator}: no enabled caller produces output it can annotate")]
    NothingToAnnotate { annotator: Annotator },
    #[error("resources.{key}: required to build the stage graph but not configured")]
    MissingResource { key: ResourceKey },
    #[error("duplicate stage node identifier {0}")]
    DuplicateNode(NodeId),
    #[error("{node} depends on unknown node {upstream}")]
    UnknownUpstream { node: NodeId, upstream: NodeId },
    #[error("cycle detected, {unresolved} nodes could not be ordered")]
    Cycle { unresolved: usize }
}

/// The node that finishes a caller for one run entry, with the call artifacts it leaves behind
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct CallerTarget {
    /// Owning run entry
    pub entry_id: String,
    /// The caller
    pub caller: Caller,
    /// Terminal node of the caller chain
    pub node: NodeId,
    /// Files that hold the calls
    pub artifacts: Vec<PathBuf>
}

/// An arena of stage nodes keyed by identifier, in insertion order
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StageGraph {
    /// All nodes; insertion order is a valid topological order when built by `build_stage_graph`
    nodes: IndexMap<NodeId, StageNode>,
    /// Terminal caller nodes, one per (entry, caller)
    caller_targets: Vec<CallerTarget>,
    /// All run entries in the graph, in configuration order
    entry_ids: Vec<String>
}

impl StageGraph {
    /// Adds a node.
    /// # Errors
    /// * if a node with the same identifier already exists
    pub fn add_node(&mut self, node: StageNode) -> Result<(), GraphError> {
        if self.nodes.contains_key(node.id()) {
            return Err(GraphError::DuplicateNode(node.id().clone()));
        }
        self.nodes.insert(node.id().clone(), node);
        Ok(())
    }

    /// Returns a topological ordering of the nodes (Kahn's algorithm), ties broken by insertion order.
    /// # Errors
    /// * if a node references an upstream node that is not in the graph
    /// * if the graph contains a cycle
    pub fn topological_order(&self) -> Result<Vec<&NodeId>, GraphError> {
        let mut in_degree: Vec<usize> = vec![0; self.nodes.len()];
        let mut children: Vec<Vec<usize>> = vec![vec![]; self.nodes.len()];
        for (index, node) in self.nodes.values().enumerate() {
            for upstream in node.upstream() {
                let parent = self.nodes.get_index_of(upstream)
                    .ok_or_else(|| GraphError::UnknownUpstream { node: node.id().clone(), upstream: upstream.clone() })?;
                in_degree[index] += 1;
                children[parent].push(index);
            }
        }

        let mut queue: VecDeque<usize> = in_degree.iter().enumerate()
            .filter(|&(_i, &d)| d == 0)
            .map(|(i, _d)| i)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(index) = queue.pop_front() {
            order.push(index);
            for &child in children[index].iter() {
                in_degree[child] -= 1;
                if in_degree[child] == 0 {
                    queue.push_back(child);
                }
            }
        }

        if order.len() != self.nodes.len() {
            return Err(GraphError::Cycle { unresolved: self.nodes.len() - order.len() });
        }
        Ok(order.into_iter()
            .filter_map(|i| self.nodes.get_index(i).map(|(k, _v)| k))
            .collect())
    }

    /// Asserts the graph is a DAG with no dangling references
    pub fn check_acyclic(&self) -> Result<(), GraphError> {
        self.topological_order().map(|_order| ())
    }

    /// Direct downstream nodes of every node
    pub fn children(&self) -> BTreeMap<&NodeId, Vec<&NodeId>> {
        let mut ret: BTreeMap<&NodeId, Vec<&NodeId>> = self.nodes.keys().map(|k| (k, vec![])).collect();
        for node in self.nodes.values() {
            for upstream in node.upstream() {
                if let Some(v) = ret.get_mut(upstream) {
                    v.push(node.id());
                }
            }
        }
        ret
    }

    /// All nodes owned by a run entry, in insertion order
    pub fn entry_nodes<'a>(&'a self, entry_id: &'a str) -> impl Iterator<Item = &'a StageNode> + 'a {
        self.nodes.values().filter(move |n| n.entry_id() == Some(entry_id))
    }

    pub fn get(&self, node_id: &NodeId) -> Option<&StageNode> {
        self.nodes.get(node_id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    // getters
    pub fn nodes(&self) -> &IndexMap<NodeId, StageNode> {
        &self.nodes
    }

    pub fn caller_targets(&self) -> &[CallerTarget] {
        &self.caller_targets
    }

    pub fn entry_ids(&self) -> &[String] {
        &self.entry_ids
    }
}

/// Builds the full stage graph for a run.
/// # Arguments
/// * `run_config` - the validated configuration
/// * `entries` - run entries that resolved successfully
/// * `config` - layout and sizing options
/// # Errors
/// * if a somatic caller is enabled and an entry lacks a tumor/normal pair
/// * if an annotator is enabled but no enabled caller produces something it can annotate
/// * if two nodes would share an identifier, or the result is not a DAG
pub fn build_stage_graph(run_config: &RunConfig, entries: &[RunEntry], config: &GraphConfig) -> Result<StageGraph, GraphError> {
    // prerequisite checks first, so we fail before emitting anything
    for &annotator in run_config.annotators().iter() {
        if !run_config.callers().iter().any(|&c| annotator.annotates(c)) {
            return Err(GraphError::NothingToAnnotate { annotator });
        }
    }

    if !config.reference_only() {
        for entry in entries.iter() {
            if entry.matched_pair().is_some() {
                continue;
            }
            if let Some(&caller) = run_config.callers().iter().find(|c| c.analysis_class().is_somatic()) {
                return Err(GraphError::UnpairedSomaticCaller { entry_id: entry.entry_id(), caller });
            }
        }
    }

    let mut assembler = GraphAssembler::new(run_config, config);
    let needs_bwa = entries.iter().any(|e| e.samples().iter().any(|(_role, s)| s.is_fastq()));
    let reference = assembler.add_reference_prep(needs_bwa)?;

    if !config.reference_only() {
        for entry in entries.iter() {
            assembler.add_entry(entry, &reference)?;
        }
    }

    let graph = assembler.finish();
    graph.check_acyclic()?;
    debug!("Stage graph has {} nodes and {} caller targets", graph.len(), graph.caller_targets().len());
    Ok(graph)
}

/// Shared reference artifacts and the nodes that produce them
struct ReferencePrep {
    /// The FASTA
    fasta: PathBuf,
    /// faidx + sequence dictionary, needed by nearly everything
    index_nodes: Vec<NodeId>,
    /// BWA index, only when reads need alignment
    bwa_node: Option<NodeId>,
    /// bgzipped + tabix-indexed BED of the evaluation intervals for Strelka/Manta
    call_regions: Option<(NodeId, PathBuf)>,
    /// Microsatellite sites for MSIsensor-pro
    microsatellites: Option<(NodeId, PathBuf)>,
    /// Common biallelic SNPs from gnomAD for contamination estimates
    biallelic_snps: Option<(NodeId, PathBuf)>
}

/// The analysis-ready alignment of one sample
#[derive(Clone, Debug)]
struct CanonicalAlignment {
    /// Resolved sample name
    sample_name: String,
    /// Node that finishes the alignment
    node: NodeId,
    /// The CRAM/BAM file
    path: PathBuf
}

/// Stateful helper that assembles the graph in dependency order
struct GraphAssembler<'a> {
    run_config: &'a RunConfig,
    config: &'a GraphConfig,
    graph: StageGraph,
    cpus: String
}

impl<'a> GraphAssembler<'a> {
    fn new(run_config: &'a RunConfig, config: &'a GraphConfig) -> Self {
        Self {
            run_config,
            config,
            graph: StageGraph::default(),
            cpus: config.cpus_per_node().to_string()
        }
    }

    fn finish(self) -> StageGraph {
        self.graph
    }

    fn resource(&self, key: ResourceKey) -> Result<&'a Path, GraphError> {
        self.run_config.resource(key)
            .ok_or(GraphError::MissingResource { key })
    }

    /// Adds a node and returns its identifier
    fn add(&mut self, id: NodeId, entry_id: Option<&str>, kind: StageKind, upstream: Vec<NodeId>, invocation: ToolInvocation) -> Result<NodeId, GraphError> {
        let node = StageNode::new(id.clone(), entry_id.map(|e| e.to_string()), kind, upstream, StageAction::Tool(invocation));
        self.graph.add_node(node)?;
        Ok(id)
    }

    /// Starts a GATK invocation with the memory budget applied
    fn gatk(&self, tool: &str) -> ToolInvocation {
        let invocation = ToolInvocation::new("gatk");
        let invocation = if self.config.memory_mb() > 0 {
            invocation.arg("--java-options").arg(format!("-Xmx{}m", self.config.memory_mb()))
        } else {
            invocation
        };
        invocation.arg(tool)
    }

    fn reference_dir(&self) -> PathBuf {
        self.config.dest_dir().join(REFERENCE_FOLDER)
    }

    fn entry_dir(&self, entry_id: &str) -> PathBuf {
        self.config.dest_dir().join(entry_id)
    }

    fn caller_dir(&self, entry_id: &str, caller: Caller) -> PathBuf {
        self.entry_dir(entry_id)
            .join(caller.analysis_class().to_string())
            .join(caller.tool_name())
    }

    /// Emits shared reference preparation
    fn add_reference_prep(&mut self, needs_bwa: bool) -> Result<ReferencePrep, GraphError> {
        let fasta = self.resource(ResourceKey::ReferenceFa)?.to_path_buf();
        let ref_dir = self.reference_dir();
        let ref_kind = StageKind::ReferencePrep;

        let faidx = self.add(
            shared_id("samtools_faidx"), None, ref_kind, vec![],
            ToolInvocation::new("samtools")
                .arg("faidx")
                .input_arg(&fasta)
                .output(&append_extension(&fasta, "fai"))
        )?;

        let dict = self.add(
            shared_id("gatk_create_sequence_dictionary"), None, ref_kind, vec![],
            self.gatk("CreateSequenceDictionary")
                .arg("--REFERENCE").input_arg(&fasta)
                .arg("--OUTPUT").output_arg(&sequence_dictionary_path(&fasta))
        )?;

        let bwa_node = if needs_bwa {
            let mut invocation = ToolInvocation::new("bwa")
                .arg("index")
                .input_arg(&fasta);
            for extension in ["amb", "ann", "bwt", "pac", "sa"] {
                invocation = invocation.output(&append_extension(&fasta, extension));
            }
            Some(self.add(shared_id("bwa_index"), None, ref_kind, vec![], invocation)?)
        } else {
            None
        };

        let run_config = self.run_config;
        let callers = run_config.callers();
        let needs_call_regions = callers.contains(&Caller::SomaticSnvIndelStrelka) ||
            callers.contains(&Caller::GermlineSnvIndelStrelka) ||
            callers.contains(&Caller::SomaticSvManta);
        let call_regions = if needs_call_regions {
            let intervals = self.resource(ResourceKey::EvaluationInterval)?;
            let bed = ref_dir.join(format!("{}.bed", file_stem(intervals)));
            let bed_gz = append_extension(&bed, "gz");
            let to_bed = self.add(
                shared_id("interval_list_to_bed"), None, ref_kind, vec![dict.clone()],
                self.gatk("IntervalListToBed")
                    .arg("--INPUT").input_arg(intervals)
                    .arg("--OUTPUT").output_arg(&bed)
            )?;
            let bgzip = self.add(
                shared_id("bgzip_call_regions"), None, ref_kind, vec![to_bed],
                ToolInvocation::new("bgzip")
                    .arg("-c")
                    .input_arg(&bed)
                    .stdout_to(&bed_gz)
            )?;
            let tabix = self.add(
                shared_id("tabix_call_regions"), None, ref_kind, vec![bgzip],
                ToolInvocation::new("tabix")
                    .args(["-f", "-p", "bed"])
                    .input_arg(&bed_gz)
                    .output(&append_extension(&bed_gz, "tbi"))
            )?;
            Some((tabix, bed_gz))
        } else {
            None
        };

        let microsatellites = if callers.contains(&Caller::SomaticMsiMsisensor) {
            let sites = ref_dir.join(format!("{}.microsatellites.tsv", file_stem(&fasta)));
            let node = self.add(
                shared_id("msisensor_scan"), None, ref_kind, vec![],
                ToolInvocation::new("msisensor-pro")
                    .arg("scan")
                    .arg("-d").input_arg(&fasta)
                    .arg("-o").output_arg(&sites)
            )?;
            Some((node, sites))
        } else {
            None
        };

        let biallelic_snps = if callers.contains(&Caller::SomaticSnvIndelGatk) {
            let gnomad = self.resource(ResourceKey::GnomadVcf)?;
            let vcf = ref_dir.join(format!("{}.biallelic_snp.vcf.gz", file_stem(gnomad)));
            let node = self.add(
                shared_id("gatk_select_biallelic_snps"), None, ref_kind, vec![faidx.clone(), dict.clone()],
                self.gatk("SelectVariants")
                    .arg("--variant").input_arg(gnomad)
                    .arg("--reference").input_arg(&fasta)
                    .arg("--intervals").input_arg(self.resource(ResourceKey::EvaluationInterval)?)
                    .args(["--select-type-to-include", "SNP", "--restrict-alleles-to", "BIALLELIC"])
                    .arg("--output").output_arg(&vcf)
            )?;
            Some((node, vcf))
        } else {
            None
        };

        Ok(ReferencePrep {
            fasta,
            index_nodes: vec![faidx, dict],
            bwa_node,
            call_regions,
            microsatellites,
            biallelic_snps
        })
    }

    /// Emits everything owned by one run entry
    fn add_entry(&mut self, entry: &RunEntry, reference: &ReferencePrep) -> Result<(), GraphError> {
        let entry_id = entry.entry_id();
        self.graph.entry_ids.push(entry_id.clone());

        let run_config = self.run_config;
        let mut alignments: BTreeMap<SampleRole, CanonicalAlignment> = Default::default();
        for (role, sample) in entry.samples() {
            let alignment = self.add_canonicalization(&entry_id, role, sample, reference)?;
            alignments.insert(role, alignment);
        }

        // QC on each canonical alignment
        for (&role, alignment) in alignments.iter() {
            for &collector in run_config.metrics_collectors().iter() {
                self.add_alignment_metrics(&entry_id, role, collector, alignment, reference)?;
            }
        }

        let germline_role = if entry.normal().is_some() { SampleRole::Normal } else { SampleRole::Tumor };
        for &caller in run_config.callers().iter() {
            let samples: Vec<&CanonicalAlignment> = if caller.analysis_class().is_somatic() {
                // pairing was checked up front
                match (alignments.get(&SampleRole::Tumor), alignments.get(&SampleRole::Normal)) {
                    (Some(t), Some(n)) => vec![t, n],
                    _ => return Err(GraphError::UnpairedSomaticCaller { entry_id: entry_id.clone(), caller })
                }
            } else {
                alignments.get(&germline_role).into_iter().collect()
            };
            let target = self.add_caller(&entry_id, caller, &samples, reference)?;
            self.add_caller_post_processing(&target, reference)?;
            self.graph.caller_targets.push(target);
        }
        Ok(())
    }

    /// Emits the steps that turn one sample into an indexed, analysis-ready alignment
    fn add_canonicalization(&mut self, entry_id: &str, role: SampleRole, sample: &SampleUnit, reference: &ReferencePrep) -> Result<CanonicalAlignment, GraphError> {
        let kind = StageKind::Canonicalize { role };
        let (read1, read2, read_group) = match sample.input() {
            InputKind::Alignment { path, .. } => {
                let node_id = entry_step_id(entry_id, &format!("{role}.alignment"));
                let node = StageNode::new(
                    node_id.clone(), Some(entry_id.to_string()), kind, vec![],
                    StageAction::PassThrough { artifacts: vec![path.clone()] }
                );
                self.graph.add_node(node)?;
                return Ok(CanonicalAlignment {
                    sample_name: sample.name().to_string(),
                    node: node_id,
                    path: path.clone()
                });
            },
            InputKind::PairedFastq { read1, read2, read_group } => (read1, read2, read_group)
        };

        let align_dir = self.entry_dir(entry_id).join("align");
        let name = sample.name();
        let fasta = reference.fasta.as_path();

        // optional adapter trimming
        let (read1, read2, trim_upstream) = if self.run_config.adapter_removal() {
            let trim_dir = align_dir.join("trim");
            let trimmed1 = trim_dir.join(format!("{name}_val_1.fq.gz"));
            let trimmed2 = trim_dir.join(format!("{name}_val_2.fq.gz"));
            let trim = self.add(
                entry_step_id(entry_id, &format!("{role}.trim_galore")), Some(entry_id), StageKind::Trim { role }, vec![],
                ToolInvocation::new("trim_galore")
                    .args(["--paired", "--gzip"])
                    .arg("--cores").arg(self.cpus.clone())
                    .arg("--basename").arg(name)
                    .arg("--output_dir").path_arg(&trim_dir)
                    .input_arg(read1)
                    .input_arg(read2)
                    .output(&trimmed1)
                    .output(&trimmed2)
            )?;
            (trimmed1, trimmed2, vec![trim])
        } else {
            (read1.clone(), read2.clone(), vec![])
        };

        let sam = align_dir.join(format!("{name}.sam"));
        let mut upstream = reference.index_nodes.clone();
        upstream.extend(reference.bwa_node.iter().cloned());
        upstream.extend(trim_upstream);
        let bwa = self.add(
            entry_step_id(entry_id, &format!("{role}.bwa_mem")), Some(entry_id), kind, upstream,
            ToolInvocation::new("bwa")
                .arg("mem")
                .arg("-t").arg(self.cpus.clone())
                .arg("-R").arg(read_group.to_sam_header())
                .arg("-o").output_arg(&sam)
                .input_arg(fasta)
                .input_arg(&read1)
                .input_arg(&read2)
        )?;

        let sorted = align_dir.join(format!("{name}.sorted.cram"));
        let mut sort = ToolInvocation::new("samtools")
            .arg("sort")
            .arg("-@").arg(self.cpus.clone());
        if self.config.memory_mb() > 0 {
            let per_thread = (self.config.memory_mb() / self.config.cpus_per_node() as u64).max(256);
            sort = sort.arg("-m").arg(format!("{per_thread}M"));
        }
        let sort = self.add(
            entry_step_id(entry_id, &format!("{role}.samtools_sort")), Some(entry_id), kind, vec![bwa],
            sort.arg("--reference").input_arg(fasta)
                .args(["-O", "cram"])
                .arg("-T").path_arg(&align_dir.join(format!("{name}.sort")))
                .arg("-o").output_arg(&sorted)
                .input_arg(&sam)
        )?;

        let markdup = align_dir.join(format!("{name}.markdup.cram"));
        let markdup_node = self.add(
            entry_step_id(entry_id, &format!("{role}.mark_duplicates")), Some(entry_id), kind, vec![sort],
            self.gatk("MarkDuplicates")
                .arg("--INPUT").input_arg(&sorted)
                .arg("--REFERENCE_SEQUENCE").input_arg(fasta)
                .arg("--METRICS_FILE").output_arg(&align_dir.join(format!("{name}.markdup.metrics.txt")))
                .arg("--OUTPUT").output_arg(&markdup)
                .args(["--ASSUME_SORT_ORDER", "coordinate"])
        )?;

        let recal_table = align_dir.join(format!("{name}.bqsr.table"));
        let mut recalibrate = self.gatk("BaseRecalibrator")
            .arg("--input").input_arg(&markdup)
            .arg("--reference").input_arg(fasta)
            .arg("--output").output_arg(&recal_table)
            .arg("--use-original-qualities");
        for key in BQSR_KNOWN_SITES {
            recalibrate = recalibrate.arg("--known-sites").input_arg(self.resource(key)?);
        }
        let recalibrate = self.add(
            entry_step_id(entry_id, &format!("{role}.base_recalibrator")), Some(entry_id), kind, vec![markdup_node], recalibrate
        )?;

        let cram = align_dir.join(format!("{name}.cram"));
        let apply = self.add(
            entry_step_id(entry_id, &format!("{role}.apply_bqsr")), Some(entry_id), kind, vec![recalibrate],
            self.gatk("ApplyBQSR")
                .arg("--input").input_arg(&markdup)
                .arg("--reference").input_arg(fasta)
                .arg("--bqsr-recal-file").input_arg(&recal_table)
                .arg("--output").output_arg(&cram)
                .args(["--static-quantized-quals", "10", "--static-quantized-quals", "20", "--static-quantized-quals", "30"])
                .args(["--add-output-sam-program-record", "--use-original-qualities"])
        )?;

        let index = self.add(
            entry_step_id(entry_id, &format!("{role}.samtools_index")), Some(entry_id), kind, vec![apply],
            ToolInvocation::new("samtools")
                .arg("index")
                .arg("-@").arg(self.cpus.clone())
                .input_arg(&cram)
                .output(&append_extension(&cram, "crai"))
        )?;

        Ok(CanonicalAlignment {
            sample_name: name.to_string(),
            node: index,
            path: cram
        })
    }

    /// Emits QC for one canonical alignment
    fn add_alignment_metrics(&mut self, entry_id: &str, role: SampleRole, collector: MetricsCollector, alignment: &CanonicalAlignment, reference: &ReferencePrep) -> Result<(), GraphError> {
        let qc_dir = self.entry_dir(entry_id).join("qc");
        let kind = StageKind::Metrics { collector };
        let name = &alignment.sample_name;
        let mut upstream = vec![alignment.node.clone()];
        upstream.extend(reference.index_nodes.iter().cloned());

        match collector {
            MetricsCollector::Samtools => {
                for command in ["stats", "flagstat", "idxstats"] {
                    let mut invocation = ToolInvocation::new("samtools").arg(command);
                    if command == "stats" {
                        invocation = invocation.arg("--reference").input_arg(&reference.fasta);
                    }
                    self.add(
                        entry_step_id(entry_id, &format!("{role}.samtools_{command}")), Some(entry_id), kind, upstream.clone(),
                        invocation.input_arg(&alignment.path)
                            .stdout_to(&qc_dir.join(format!("{name}.samtools.{command}.txt")))
                    )?;
                }
            },
            MetricsCollector::Picard => {
                let prefix = qc_dir.join(format!("{name}.picard"));
                self.add(
                    entry_step_id(entry_id, &format!("{role}.collect_multiple_metrics")), Some(entry_id), kind, upstream,
                    self.gatk("CollectMultipleMetrics")
                        .arg("--INPUT").input_arg(&alignment.path)
                        .arg("--REFERENCE_SEQUENCE").input_arg(&reference.fasta)
                        .arg("--OUTPUT").path_arg(&prefix)
                        .output(&append_extension(&prefix, "alignment_summary_metrics"))
                )?;
            },
            MetricsCollector::Bcftools => {
                // runs on caller output instead
            }
        };
        Ok(())
    }

    /// Emits the nodes of one caller and returns the terminal node with its call artifacts
    fn add_caller(&mut self, entry_id: &str, caller: Caller, samples: &[&CanonicalAlignment], reference: &ReferencePrep) -> Result<CallerTarget, GraphError> {
        let out_dir = self.caller_dir(entry_id, caller);
        let kind = StageKind::Call { caller };
        let fasta = reference.fasta.as_path();
        let terminal_id = entry_step_id(entry_id, &caller.to_string());
        let step_id = |step: &str| entry_step_id(entry_id, &format!("{caller}.{step}"));

        let mut upstream: Vec<NodeId> = samples.iter().map(|s| s.node.clone()).collect();
        upstream.extend(reference.index_nodes.iter().cloned());
        let call_regions = || reference.call_regions.as_ref()
            .ok_or(GraphError::MissingResource { key: ResourceKey::EvaluationInterval });

        let artifacts = match caller {
            Caller::SomaticSnvIndelGatk => {
                let filtered = self.add_mutect2_chain(entry_id, samples, reference, upstream, &terminal_id)?;
                vec![filtered]
            },
            Caller::SomaticSnvIndelStrelka |
            Caller::GermlineSnvIndelStrelka |
            Caller::SomaticSvManta => {
                let (regions_node, regions_bed) = call_regions()?;
                upstream.push(regions_node.clone());
                let run_dir = out_dir.join(format!("{entry_id}.run"));
                let run_script = run_dir.join("runWorkflow.py");
                let (script, results) = match caller {
                    Caller::SomaticSnvIndelStrelka => ("configureStrelkaSomaticWorkflow.py", vec!["somatic.snvs.vcf.gz", "somatic.indels.vcf.gz"]),
                    Caller::GermlineSnvIndelStrelka => ("configureStrelkaGermlineWorkflow.py", vec!["variants.vcf.gz"]),
                    _ => ("configManta.py", vec!["somaticSV.vcf.gz"])
                };
                let mut configure = ToolInvocation::new(script);
                if caller.analysis_class().is_somatic() {
                    configure = configure
                        .arg(format!("--tumorBam={}", samples[0].path.display())).input(&samples[0].path)
                        .arg(format!("--normalBam={}", samples[1].path.display())).input(&samples[1].path);
                } else {
                    configure = configure
                        .arg(format!("--bam={}", samples[0].path.display())).input(&samples[0].path);
                }
                configure = configure
                    .arg(format!("--referenceFasta={}", fasta.display())).input(fasta)
                    .arg(format!("--callRegions={}", regions_bed.display())).input(regions_bed)
                    .arg(format!("--runDir={}", run_dir.display())).output(&run_script);
                if self.run_config.exome() {
                    configure = configure.arg("--exome");
                }
                let configure = self.add(step_id("configure"), Some(entry_id), kind, upstream, configure)?;

                let memory_gb = (self.config.memory_mb() / 1024).max(1);
                let results: Vec<PathBuf> = results.into_iter()
                    .map(|r| run_dir.join("results").join("variants").join(r))
                    .collect();
                let mut run = ToolInvocation::new(run_script.display().to_string())
                    .work_dir(&run_dir)
                    .input(&run_script)
                    .args(["--mode", "local"])
                    .arg(format!("--jobs={}", self.cpus))
                    .arg(format!("--memGb={memory_gb}"));
                for result in results.iter() {
                    run = run.output(result);
                }
                self.add(terminal_id.clone(), Some(entry_id), kind, vec![configure], run)?;
                results
            },
            Caller::SomaticSvDelly => {
                let (tumor, normal) = (samples[0], samples[1]);
                let bcf = out_dir.join(format!("{entry_id}.delly.bcf"));
                self.add(
                    terminal_id.clone(), Some(entry_id), kind, upstream,
                    ToolInvocation::new("delly")
                        .arg("call")
                        .arg("--outfile").output_arg(&bcf)
                        .arg("--genome").input_arg(fasta)
                        .arg("--exclude").input_arg(self.resource(ResourceKey::ExclusionBed)?)
                        .input_arg(&tumor.path)
                        .input_arg(&normal.path)
                        .env("OMP_NUM_THREADS", self.cpus.clone())
                )?;
                vec![bcf]
            },
            Caller::SomaticCnvGatk => {
                let segments = self.add_gatk_cnv_chain(entry_id, samples, reference, upstream, &terminal_id)?;
                vec![segments]
            },
            Caller::SomaticCnvCnvkit => {
                let (tumor, normal) = (samples[0], samples[1]);
                let tumor_stem = file_stem(&tumor.path);
                let call_cns = out_dir.join(format!("{tumor_stem}.call.cns"));
                let cns = out_dir.join(format!("{tumor_stem}.cns"));
                let seq_method = if self.run_config.exome() { "hybrid" } else { "wgs" };
                self.add(
                    terminal_id.clone(), Some(entry_id), kind, upstream,
                    ToolInvocation::new("cnvkit.py")
                        .work_dir(&out_dir)
                        .arg("batch")
                        .arg(format!("--seq-method={seq_method}"))
                        .arg(format!("--fasta={}", fasta.display())).input(fasta)
                        .arg(format!("--access={}", self.resource(ResourceKey::AccessBed)?.display()))
                        .input(self.resource(ResourceKey::AccessBed)?)
                        .arg(format!("--annotate={}", self.resource(ResourceKey::RefflatTxt)?.display()))
                        .input(self.resource(ResourceKey::RefflatTxt)?)
                        .arg(format!("--processes={}", self.cpus))
                        .arg("--drop-low-coverage")
                        .arg(format!("--output-dir={}", out_dir.display()))
                        .arg(format!("--output-reference={}", out_dir.join(format!("{}.reference.cnn", file_stem(&normal.path))).display()))
                        .arg(format!("--normal={}", normal.path.display())).input(&normal.path)
                        .input_arg(&tumor.path)
                        .output(&call_cns)
                        .output(&cns)
                )?;
                vec![call_cns, cns]
            },
            Caller::SomaticMsiMsisensor => {
                let (tumor, normal) = (samples[0], samples[1]);
                let (sites_node, sites) = reference.microsatellites.as_ref()
                    .ok_or(GraphError::MissingResource { key: ResourceKey::ReferenceFa })?;
                upstream.push(sites_node.clone());
                let prefix = out_dir.join(format!("{entry_id}.msisensor"));
                self.add(
                    terminal_id.clone(), Some(entry_id), kind, upstream,
                    ToolInvocation::new("msisensor-pro")
                        .arg("msi")
                        .arg("-d").input_arg(sites)
                        .arg("-t").input_arg(&tumor.path)
                        .arg("-n").input_arg(&normal.path)
                        .arg("-g").input_arg(fasta)
                        .arg("-b").arg(self.cpus.clone())
                        .arg("-o").output_arg(&prefix)
                )?;
                vec![prefix]
            },
            Caller::GermlineSnvIndelGatk => {
                let sample = samples[0];
                let intervals = self.resource(ResourceKey::EvaluationInterval)?;
                let prefix = format!("{}.haplotypecaller", sample.sample_name);
                let raw_vcf = out_dir.join(format!("{prefix}.vcf.gz"));
                let realigned = out_dir.join(format!("{prefix}.bam"));
                let haplotype_caller = self.add(
                    step_id("haplotype_caller"), Some(entry_id), kind, upstream,
                    self.gatk("HaplotypeCaller")
                        .arg("--input").input_arg(&sample.path)
                        .arg("--reference").input_arg(fasta)
                        .arg("--dbsnp").input_arg(self.resource(ResourceKey::DbsnpVcf)?)
                        .arg("--intervals").input_arg(intervals)
                        .arg("--native-pair-hmm-threads").arg(self.cpus.clone())
                        .args(["--standard-min-confidence-threshold-for-calling", "0"])
                        .arg("--bam-output").output_arg(&realigned)
                        .arg("--output").output_arg(&raw_vcf)
                )?;

                // scored against the locally realigned reads HaplotypeCaller just wrote
                let scored_vcf = out_dir.join(format!("{prefix}.cnn.vcf.gz"));
                let score = self.add(
                    step_id("cnn_score_variants"), Some(entry_id), kind, vec![haplotype_caller],
                    self.gatk("CNNScoreVariants")
                        .arg("--input").input_arg(&realigned)
                        .arg("--variant").input_arg(&raw_vcf)
                        .arg("--reference").input_arg(fasta)
                        .arg("--intervals").input_arg(intervals)
                        .args(["--tensor-type", "read_tensor"])
                        .arg("--output").output_arg(&scored_vcf)
                )?;

                let filtered = out_dir.join(format!("{prefix}.filtered.vcf.gz"));
                let mut tranches = self.gatk("FilterVariantTranches")
                    .arg("--variant").input_arg(&scored_vcf);
                for key in [ResourceKey::HapmapVcf, ResourceKey::MillsIndelVcf] {
                    tranches = tranches.arg("--resource").input_arg(self.resource(key)?);
                }
                self.add(
                    terminal_id.clone(), Some(entry_id), kind, vec![score],
                    tranches.args(["--info-key", "CNN_2D"])
                        .args(["--snp-tranche", "99.9", "--snp-tranche", "99.95"])
                        .args(["--indel-tranche", "99.0", "--indel-tranche", "99.4"])
                        .arg("--invalidate-previous-filters")
                        .arg("--output").output_arg(&filtered)
                )?;
                vec![filtered]
            }
        };

        Ok(CallerTarget {
            entry_id: entry_id.to_string(),
            caller,
            node: terminal_id,
            artifacts
        })
    }

    /// Mutect2 with contamination and read-orientation filtering, returns the filtered VCF
    fn add_mutect2_chain(&mut self, entry_id: &str, samples: &[&CanonicalAlignment], reference: &ReferencePrep, upstream: Vec<NodeId>, terminal_id: &NodeId) -> Result<PathBuf, GraphError> {
        let caller = Caller::SomaticSnvIndelGatk;
        let kind = StageKind::Call { caller };
        let out_dir = self.caller_dir(entry_id, caller);
        let fasta = reference.fasta.as_path();
        let intervals = self.resource(ResourceKey::EvaluationInterval)?;
        let step_id = |step: &str| entry_step_id(entry_id, &format!("{caller}.{step}"));
        let (tumor, normal) = (samples[0], samples[1]);
        let (snps_node, snps) = reference.biallelic_snps.as_ref()
            .ok_or(GraphError::MissingResource { key: ResourceKey::GnomadVcf })?;

        let mut pileup_nodes = vec![];
        let mut pileup_tables = vec![];
        for (role, sample) in [(SampleRole::Tumor, tumor), (SampleRole::Normal, normal)] {
            let table = out_dir.join(format!("{entry_id}.{role}.pileup.table"));
            let mut pileup_upstream = vec![sample.node.clone(), snps_node.clone()];
            pileup_upstream.extend(reference.index_nodes.iter().cloned());
            let node = self.add(
                step_id(&format!("get_pileup_summaries.{role}")), Some(entry_id), kind, pileup_upstream,
                self.gatk("GetPileupSummaries")
                    .arg("--input").input_arg(&sample.path)
                    .arg("--reference").input_arg(fasta)
                    .arg("--variant").input_arg(snps)
                    .arg("--intervals").input_arg(intervals)
                    .arg("--output").output_arg(&table)
            )?;
            pileup_nodes.push(node);
            pileup_tables.push(table);
        }

        let contamination_table = out_dir.join(format!("{entry_id}.contamination.table"));
        let segment_table = out_dir.join(format!("{entry_id}.segment.table"));
        let contamination = self.add(
            step_id("calculate_contamination"), Some(entry_id), kind, pileup_nodes,
            self.gatk("CalculateContamination")
                .arg("--input").input_arg(&pileup_tables[0])
                .arg("--matched-normal").input_arg(&pileup_tables[1])
                .arg("--output").output_arg(&contamination_table)
                .arg("--tumor-segmentation").output_arg(&segment_table)
        )?;

        let raw_vcf = out_dir.join(format!("{entry_id}.mutect2.vcf.gz"));
        let raw_stats = append_extension(&raw_vcf, "stats");
        let f1r2 = out_dir.join(format!("{entry_id}.f1r2.tar.gz"));
        let mutect2 = self.add(
            step_id("mutect2"), Some(entry_id), kind, upstream,
            self.gatk("Mutect2")
                .arg("--reference").input_arg(fasta)
                .arg("--input").input_arg(&tumor.path)
                .arg("--input").input_arg(&normal.path)
                .arg("--normal-sample").arg(normal.sample_name.clone())
                .arg("--germline-resource").input_arg(self.resource(ResourceKey::GnomadVcf)?)
                .arg("--intervals").input_arg(intervals)
                .arg("--native-pair-hmm-threads").arg(self.cpus.clone())
                .args(["--max-mnp-distance", "0"])
                .arg("--f1r2-tar-gz").output_arg(&f1r2)
                .arg("--output").output_arg(&raw_vcf)
                .output(&raw_stats)
        )?;

        let orientation_priors = out_dir.join(format!("{entry_id}.read-orientation-model.tar.gz"));
        let orientation = self.add(
            step_id("learn_read_orientation_model"), Some(entry_id), kind, vec![mutect2.clone()],
            self.gatk("LearnReadOrientationModel")
                .arg("--input").input_arg(&f1r2)
                .arg("--output").output_arg(&orientation_priors)
        )?;

        let filtered = out_dir.join(format!("{entry_id}.mutect2.filtered.vcf.gz"));
        self.add(
            terminal_id.clone(), Some(entry_id), kind, vec![mutect2, orientation, contamination],
            self.gatk("FilterMutectCalls")
                .arg("--reference").input_arg(fasta)
                .arg("--intervals").input_arg(intervals)
                .arg("--variant").input_arg(&raw_vcf)
                .arg("--stats").input_arg(&raw_stats)
                .arg("--contamination-table").input_arg(&contamination_table)
                .arg("--tumor-segmentation").input_arg(&segment_table)
                .arg("--orientation-bias-artifact-priors").input_arg(&orientation_priors)
                .arg("--filtering-stats").output_arg(&append_extension(&filtered, "stats"))
                .arg("--output").output_arg(&filtered)
        )?;
        Ok(filtered)
    }

    /// The GATK read-count copy-number chain, returns the called segments
    fn add_gatk_cnv_chain(&mut self, entry_id: &str, samples: &[&CanonicalAlignment], reference: &ReferencePrep, upstream: Vec<NodeId>, terminal_id: &NodeId) -> Result<PathBuf, GraphError> {
        let caller = Caller::SomaticCnvGatk;
        let kind = StageKind::Call { caller };
        let out_dir = self.caller_dir(entry_id, caller);
        let fasta = reference.fasta.as_path();
        let step_id = |step: &str| entry_step_id(entry_id, &format!("{caller}.{step}"));
        let (tumor, normal) = (samples[0], samples[1]);
        let (bin_length, padding) = if self.run_config.exome() { ("0", "250") } else { ("1000", "0") };

        let intervals = out_dir.join(format!("{entry_id}.preprocessed.interval_list"));
        let preprocess = self.add(
            step_id("preprocess_intervals"), Some(entry_id), kind, upstream.clone(),
            self.gatk("PreprocessIntervals")
                .arg("--reference").input_arg(fasta)
                .arg("--intervals").input_arg(self.resource(ResourceKey::EvaluationInterval)?)
                .arg("--exclude-intervals").input_arg(self.resource(ResourceKey::CnvBlacklist)?)
                .args(["--interval-merging-rule", "OVERLAPPING_ONLY"])
                .args(["--bin-length", bin_length, "--padding", padding])
                .arg("--output").output_arg(&intervals)
        )?;

        let annotated = out_dir.join(format!("{entry_id}.annotated.tsv"));
        let annotate = self.add(
            step_id("annotate_intervals"), Some(entry_id), kind, vec![preprocess.clone()],
            self.gatk("AnnotateIntervals")
                .arg("--reference").input_arg(fasta)
                .arg("--intervals").input_arg(&intervals)
                .args(["--interval-merging-rule", "OVERLAPPING_ONLY"])
                .arg("--output").output_arg(&annotated)
        )?;

        let counts = out_dir.join(format!("{}.counts.hdf5", tumor.sample_name));
        let collect_counts = self.add(
            step_id("collect_read_counts"), Some(entry_id), kind, vec![preprocess],
            self.gatk("CollectReadCounts")
                .arg("--input").input_arg(&tumor.path)
                .arg("--reference").input_arg(fasta)
                .arg("--intervals").input_arg(&intervals)
                .args(["--interval-merging-rule", "OVERLAPPING_ONLY", "--format", "HDF5"])
                .arg("--output").output_arg(&counts)
        )?;

        let standardized = out_dir.join(format!("{}.standardizedCR.tsv", tumor.sample_name));
        let denoised = out_dir.join(format!("{}.denoisedCR.tsv", tumor.sample_name));
        let denoise = self.add(
            step_id("denoise_read_counts"), Some(entry_id), kind, vec![collect_counts, annotate],
            self.gatk("DenoiseReadCounts")
                .arg("--input").input_arg(&counts)
                .arg("--annotated-intervals").input_arg(&annotated)
                .arg("--standardized-copy-ratios").output_arg(&standardized)
                .arg("--denoised-copy-ratios").output_arg(&denoised)
        )?;

        let mut allelic_nodes = vec![denoise];
        let mut allelic_counts = vec![];
        for (role, sample) in [(SampleRole::Tumor, tumor), (SampleRole::Normal, normal)] {
            let allelic = out_dir.join(format!("{}.allelicCounts.tsv", sample.sample_name));
            let node = self.add(
                step_id(&format!("collect_allelic_counts.{role}")), Some(entry_id), kind, upstream.clone(),
                self.gatk("CollectAllelicCounts")
                    .arg("--input").input_arg(&sample.path)
                    .arg("--reference").input_arg(fasta)
                    .arg("--intervals").input_arg(self.resource(ResourceKey::GnomadVcf)?)
                    .arg("--output").output_arg(&allelic)
            )?;
            allelic_nodes.push(node);
            allelic_counts.push(allelic);
        }

        let copy_ratio_segments = out_dir.join(format!("{entry_id}.cr.seg"));
        let model = self.add(
            step_id("model_segments"), Some(entry_id), kind, allelic_nodes,
            self.gatk("ModelSegments")
                .arg("--denoised-copy-ratios").input_arg(&denoised)
                .arg("--allelic-counts").input_arg(&allelic_counts[0])
                .arg("--normal-allelic-counts").input_arg(&allelic_counts[1])
                .arg("--output-prefix").arg(entry_id)
                .arg("--output").path_arg(&out_dir)
                .output(&copy_ratio_segments)
                .output(&out_dir.join(format!("{entry_id}.modelFinal.seg")))
        )?;

        let called = out_dir.join(format!("{entry_id}.called.seg"));
        self.add(
            terminal_id.clone(), Some(entry_id), kind, vec![model],
            self.gatk("CallCopyRatioSegments")
                .arg("--input").input_arg(&copy_ratio_segments)
                .arg("--output").output_arg(&called)
        )?;
        Ok(called)
    }

    /// Emits bcftools stats, normalization and annotators that consume a caller's artifacts.
    /// Annotators read the normalized VCF when normalization is enabled.
    fn add_caller_post_processing(&mut self, target: &CallerTarget, reference: &ReferencePrep) -> Result<(), GraphError> {
        let entry_id = target.entry_id.as_str();
        let caller = target.caller;
        let entry_dir = self.entry_dir(entry_id);
        let qc_dir = entry_dir.join("qc");
        let normalization_dir = entry_dir.join("normalization");
        let annotation_dir = entry_dir.join("annotation");
        let fasta = reference.fasta.as_path();
        let run_config = self.run_config;
        let reference_version = run_config.reference_version();
        let multiple = target.artifacts.len() > 1;

        for (index, artifact) in target.artifacts.iter().enumerate() {
            let suffix = if multiple { format!(".{}", index + 1) } else { String::new() };
            let stem = format!("{caller}.{}", variant_file_stem(artifact));
            let mut upstream = vec![target.node.clone()];
            upstream.extend(reference.index_nodes.iter().cloned());

            if caller.produces_vcf() && run_config.metrics_collectors().contains(&MetricsCollector::Bcftools) {
                self.add(
                    entry_step_id(entry_id, &format!("{caller}.bcftools_stats{suffix}")), Some(entry_id),
                    StageKind::Metrics { collector: MetricsCollector::Bcftools }, upstream.clone(),
                    ToolInvocation::new("bcftools")
                        .arg("stats")
                        .input_arg(artifact)
                        .stdout_to(&qc_dir.join(format!("{stem}.bcftools.stats.txt")))
                )?;
            }

            let (annotation_input, upstream) = if caller.produces_vcf() && run_config.normalize_vcf() {
                let normalized = normalization_dir.join(format!("{stem}.norm.vcf.gz"));
                let node = self.add(
                    entry_step_id(entry_id, &format!("{caller}.bcftools_norm{suffix}")), Some(entry_id),
                    StageKind::Normalize { caller }, upstream,
                    ToolInvocation::new("bcftools")
                        .arg("norm")
                        .arg("--fasta-ref").input_arg(fasta)
                        .args(["--check-ref", "w", "--multiallelics", "-both", "--output-type", "z", "--write-index=tbi"])
                        .arg("--threads").arg(self.cpus.clone())
                        .arg("--output").output_arg(&normalized)
                        .output(&append_extension(&normalized, "tbi"))
                        .input_arg(artifact)
                )?;
                (normalized, vec![node])
            } else {
                (artifact.clone(), upstream)
            };
            let artifact = &annotation_input;

            for &annotator in run_config.annotators().iter() {
                if !annotator.annotates(caller) {
                    continue;
                }
                let node_id = entry_step_id(entry_id, &format!("{caller}.{annotator}{suffix}"));
                let kind = StageKind::Annotate { annotator, caller };
                let invocation = match annotator {
                    Annotator::Funcotator => {
                        let data_key = if caller.analysis_class().is_somatic() {
                            ResourceKey::FuncotatorSomaticDataDir
                        } else {
                            ResourceKey::FuncotatorGermlineDataDir
                        };
                        let data_dir = self.resource(data_key)?;
                        if caller.produces_vcf() {
                            self.gatk("Funcotator")
                                .arg("--variant").input_arg(artifact)
                                .arg("--reference").input_arg(fasta)
                                .arg("--ref-version").arg(reference_version.ucsc_name())
                                .arg("--data-sources-path").input_arg(data_dir)
                                .args(["--output-file-format", "VCF"])
                                .arg("--output").output_arg(&annotation_dir.join(format!("{stem}.funcotator.vcf.gz")))
                        } else {
                            self.gatk("FuncotateSegments")
                                .arg("--segments").input_arg(artifact)
                                .arg("--reference").input_arg(fasta)
                                .arg("--ref-version").arg(reference_version.ucsc_name())
                                .arg("--data-sources-path").input_arg(data_dir)
                                .args(["--output-file-format", "SEG"])
                                .arg("--output").output_arg(&annotation_dir.join(format!("{stem}.funcotated.tsv")))
                        }
                    },
                    Annotator::Snpeff => {
                        ToolInvocation::new("snpEff")
                            .arg("ann")
                            .arg("-dataDir").input_arg(self.resource(ResourceKey::SnpeffDataDir)?)
                            .arg("-csvStats").output_arg(&annotation_dir.join(format!("{stem}.snpeff.csv")))
                            .arg(reference_version.snpeff_genome())
                            .input_arg(artifact)
                            .stdout_to(&annotation_dir.join(format!("{stem}.snpeff.vcf")))
                    },
                    Annotator::Vep => {
                        ToolInvocation::new("vep")
                            .args(["--cache", "--offline", "--vcf", "--force_overwrite"])
                            .arg("--dir").input_arg(self.resource(ResourceKey::VepCacheDir)?)
                            .arg("--fasta").input_arg(fasta)
                            .arg("--assembly").arg(reference_version.ncbi_name())
                            .arg("--fork").arg(self.cpus.clone())
                            .arg("--input_file").input_arg(artifact)
                            .arg("--output_file").output_arg(&annotation_dir.join(format!("{stem}.vep.vcf")))
                    }
                };
                self.add(node_id, Some(entry_id), kind, upstream.clone(), invocation)?;
            }
        }
        Ok(())
    }
}

fn shared_id(step: &str) -> NodeId {
    NodeId::new(format!("{REFERENCE_FOLDER}/{step}"))
}

fn entry_step_id(entry_id: &str, step: &str) -> NodeId {
    NodeId::new(format!("{entry_id}/{step}"))
}

/// Appends an extension without replacing the existing one, e.g. `a.fa` -> `a.fa.fai`
pub fn append_extension(path: &Path, extension: &str) -> PathBuf {
    let mut value: OsString = path.as_os_str().to_os_string();
    value.push(".");
    value.push(extension);
    PathBuf::from(value)
}

/// The GATK sequence dictionary that goes with a FASTA, e.g. `a.fa.gz` -> `a.dict`
pub fn sequence_dictionary_path(fasta: &Path) -> PathBuf {
    fasta.with_file_name(format!("{}.dict", file_stem(fasta)))
}

/// File name with the last extension removed, and a trailing `.gz` removed first
fn file_stem(path: &Path) -> String {
    let name = path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let name = name.strip_suffix(".gz").unwrap_or(&name);
    match name.rsplit_once('.') {
        Some((stem, _ext)) if !stem.is_empty() => stem.to_string(),
        _ => name.to_string()
    }
}

/// File name with variant file extensions removed
fn variant_file_stem(path: &Path) -> String {
    let name = path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    for suffix in [".vcf.gz", ".vcf", ".bcf", ".seg", ".cns"] {
        if let Some(stem) = name.strip_suffix(suffix) {
            return stem.to_string();
        }
    }
    name
}
