//! Composite driver: named, ordered stages over one shared mapping store.

use core::fmt;
use core::str::FromStr;
use std::sync::Arc;

use crate::config::MatcherConfig;
use crate::debug;
use crate::error::{MatchError, Result};
use crate::mapping::MappingStore;
use crate::matchers::{
    BottomUpMatcher, FineGrainedRepair, GreedyBottomUpMatcher, GreedySubtreeMatcher,
    IdenticalSubtreeMatcher, LcsMatcher, LeafMoveReconciliation, LeavesMatcher,
    MajorityParentRepair, Matcher, OptimalMatcher, OptimizedMatcher, OrphanLeafAdoption,
};
use crate::similarity::LabelConfiguration;
use crate::tree::{DiffTree, Tree};

/// A matcher stage identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Identical subtrees by hash (`identical`).
    Identical,
    /// GumTree greedy top-down (`gt-subtree`).
    GreedySubtree,
    /// GumTree greedy bottom-up (`gt-bottom-up`).
    GreedyBottomUp,
    /// ChangeDistiller leaves, one thread (`cd-leaves`).
    Leaves,
    /// ChangeDistiller leaves, sharded (`cd-leaves-par`).
    ParallelLeaves,
    /// ChangeDistiller bottom-up (`cd-bottom-up`).
    BottomUp,
    /// Label-aware ChangeDistiller (`cd-opt`).
    Optimized,
    /// Minimal edit distance (`rted`).
    Optimal,
    /// LCS realignment (`lcs`).
    Lcs,
    /// All three repair passes (`repair`).
    Repair,
    /// Orphan-leaf adoption only (`orphan-leaves`).
    OrphanLeaves,
    /// Majority parent repair only (`parent-repair`).
    ParentRepair,
    /// Leaf-move reconciliation only (`leaf-moves`).
    LeafMoves,
}

impl Stage {
    /// Every stage.
    pub const ALL: [Stage; 13] = [
        Stage::Identical,
        Stage::GreedySubtree,
        Stage::GreedyBottomUp,
        Stage::Leaves,
        Stage::ParallelLeaves,
        Stage::BottomUp,
        Stage::Optimized,
        Stage::Optimal,
        Stage::Lcs,
        Stage::Repair,
        Stage::OrphanLeaves,
        Stage::ParentRepair,
        Stage::LeafMoves,
    ];

    /// Name accepted by [`FromStr`]. `leaves`, `bottom-up`, `optimal` and
    /// `optimized` are accepted as aliases too.
    pub fn name(self) -> &'static str {
        match self {
            Stage::Identical => "identical",
            Stage::GreedySubtree => "gt-subtree",
            Stage::GreedyBottomUp => "gt-bottom-up",
            Stage::Leaves => "cd-leaves",
            Stage::ParallelLeaves => "cd-leaves-par",
            Stage::BottomUp => "cd-bottom-up",
            Stage::Optimized => "cd-opt",
            Stage::Optimal => "rted",
            Stage::Lcs => "lcs",
            Stage::Repair => "repair",
            Stage::OrphanLeaves => "orphan-leaves",
            Stage::ParentRepair => "parent-repair",
            Stage::LeafMoves => "leaf-moves",
        }
    }

    /// Instantiate the stage.
    pub fn build<T>(
        self,
        config: &MatcherConfig,
        labels: &Arc<LabelConfiguration>,
    ) -> Box<dyn Matcher<T>>
    where
        T: DiffTree + Sync + 'static,
    {
        match self {
            Stage::Identical => Box::new(IdenticalSubtreeMatcher),
            Stage::GreedySubtree => Box::new(GreedySubtreeMatcher::from_config(config)),
            Stage::GreedyBottomUp => Box::new(GreedyBottomUpMatcher::new(config, labels.clone())),
            Stage::Leaves => Box::new(LeavesMatcher::sequential(config)),
            Stage::ParallelLeaves => Box::new(LeavesMatcher::parallel(config)),
            Stage::BottomUp => Box::new(BottomUpMatcher::from_config(config)),
            Stage::Optimized => Box::new(OptimizedMatcher::new(config, labels.clone())),
            Stage::Optimal => Box::new(OptimalMatcher::from_config(config)),
            Stage::Lcs => Box::new(LcsMatcher::from_config(config)),
            Stage::Repair => Box::new(FineGrainedRepair::from_config(config)),
            Stage::OrphanLeaves => Box::new(OrphanLeafAdoption),
            Stage::ParentRepair => Box::new(MajorityParentRepair),
            Stage::LeafMoves => Box::new(LeafMoveReconciliation::from_config(config)),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Stage {
    type Err = MatchError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let alias = match s {
            "leaves" => Some(Stage::Leaves),
            "bottom-up" => Some(Stage::BottomUp),
            "optimal" => Some(Stage::Optimal),
            "optimized" => Some(Stage::Optimized),
            _ => None,
        };
        alias
            .or_else(|| Stage::ALL.into_iter().find(|stage| stage.name() == s))
            .ok_or_else(|| MatchError::Configuration(format!("unknown stage `{s}`")))
    }
}

use Stage::{
    BottomUp as CdBu, GreedyBottomUp as GtBu, GreedySubtree as GtTd, Identical as A, Lcs as B,
    Optimal as Rted, Optimized as CdOpt, ParallelLeaves as CdLeaves, Repair as Cde,
};

/// The published matcher compositions.
///
/// `A` adds the identical-subtree matcher in front, `B` the LCS realignment
/// and `CDE` the three repair passes after the core matchers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Preset {
    Cd,
    CdA,
    CdAb,
    CdAbcde,
    CdAcde,
    CdB,
    CdBcde,
    CdCde,
    CdOpt,
    Gt,
    GtA,
    GtAb,
    GtAbcde,
    GtAcde,
    GtB,
    GtBcde,
    GtCde,
    RtedA,
    RtedAb,
    RtedAbcde,
    RtedAcde,
    RtedB,
    RtedBcde,
    RtedCde,
}

impl Preset {
    /// Every preset.
    pub const ALL: [Preset; 24] = [
        Preset::Cd,
        Preset::CdA,
        Preset::CdAb,
        Preset::CdAbcde,
        Preset::CdAcde,
        Preset::CdB,
        Preset::CdBcde,
        Preset::CdCde,
        Preset::CdOpt,
        Preset::Gt,
        Preset::GtA,
        Preset::GtAb,
        Preset::GtAbcde,
        Preset::GtAcde,
        Preset::GtB,
        Preset::GtBcde,
        Preset::GtCde,
        Preset::RtedA,
        Preset::RtedAb,
        Preset::RtedAbcde,
        Preset::RtedAcde,
        Preset::RtedB,
        Preset::RtedBcde,
        Preset::RtedCde,
    ];

    /// Stages in execution order.
    pub fn stages(self) -> &'static [Stage] {
        match self {
            Preset::Cd => &[CdLeaves, CdBu],
            Preset::CdA => &[A, CdLeaves, CdBu],
            Preset::CdAb => &[A, CdLeaves, CdBu, B],
            Preset::CdAbcde => &[A, CdLeaves, CdBu, B, Cde],
            Preset::CdAcde => &[A, CdLeaves, CdBu, Cde],
            Preset::CdB => &[CdLeaves, CdBu, B],
            Preset::CdBcde => &[CdLeaves, CdBu, B, Cde],
            Preset::CdCde => &[CdLeaves, CdBu, Cde],
            Preset::CdOpt => &[A, CdOpt, B, Cde],
            Preset::Gt => &[GtTd, GtBu],
            Preset::GtA => &[A, GtTd, GtBu],
            Preset::GtAb => &[A, GtTd, GtBu, B],
            Preset::GtAbcde => &[A, GtTd, GtBu, B, Cde],
            Preset::GtAcde => &[A, GtTd, GtBu, Cde],
            Preset::GtB => &[GtTd, GtBu, B],
            Preset::GtBcde => &[GtTd, GtBu, B, Cde],
            Preset::GtCde => &[GtTd, GtBu, Cde],
            Preset::RtedA => &[A, Rted],
            Preset::RtedAb => &[A, Rted, B],
            Preset::RtedAbcde => &[A, Rted, B, Cde],
            Preset::RtedAcde => &[A, Rted, Cde],
            Preset::RtedB => &[Rted, B],
            Preset::RtedBcde => &[Rted, B, Cde],
            Preset::RtedCde => &[Rted, Cde],
        }
    }

    /// Conventional name, e.g. `CD_ABCDE`.
    pub fn name(self) -> &'static str {
        match self {
            Preset::Cd => "CD",
            Preset::CdA => "CD_A",
            Preset::CdAb => "CD_AB",
            Preset::CdAbcde => "CD_ABCDE",
            Preset::CdAcde => "CD_ACDE",
            Preset::CdB => "CD_B",
            Preset::CdBcde => "CD_BCDE",
            Preset::CdCde => "CD_CDE",
            Preset::CdOpt => "CD_OPT",
            Preset::Gt => "GT",
            Preset::GtA => "GT_A",
            Preset::GtAb => "GT_AB",
            Preset::GtAbcde => "GT_ABCDE",
            Preset::GtAcde => "GT_ACDE",
            Preset::GtB => "GT_B",
            Preset::GtBcde => "GT_BCDE",
            Preset::GtCde => "GT_CDE",
            Preset::RtedA => "RTED_A",
            Preset::RtedAb => "RTED_AB",
            Preset::RtedAbcde => "RTED_ABCDE",
            Preset::RtedAcde => "RTED_ACDE",
            Preset::RtedB => "RTED_B",
            Preset::RtedBcde => "RTED_BCDE",
            Preset::RtedCde => "RTED_CDE",
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Preset {
    type Err = MatchError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        Preset::ALL
            .into_iter()
            .find(|preset| preset.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| MatchError::Configuration(format!("unknown preset `{s}`")))
    }
}

/// An ordered list of matcher stages sharing one [`MappingStore`].
pub struct Pipeline<T: DiffTree = Tree> {
    stages: Vec<Box<dyn Matcher<T>>>,
}

impl<T: DiffTree> fmt::Debug for Pipeline<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.stages.iter().map(|s| s.name()))
            .finish()
    }
}

impl<T: DiffTree> Pipeline<T> {
    /// Pipeline over explicit matcher instances.
    pub fn new(stages: Vec<Box<dyn Matcher<T>>>) -> Self {
        Self { stages }
    }

    /// Stage names in execution order.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every stage on a fresh store.
    pub fn run(&self, src: &T, dst: &T) -> Result<MappingStore> {
        let mut store = MappingStore::with_capacity(src.node_count(), dst.node_count());
        self.run_with(src, dst, &mut store)?;
        Ok(store)
    }

    /// Run every stage on an existing store. Stops at the first failing stage;
    /// the store then holds whatever the earlier stages produced.
    pub fn run_with(&self, src: &T, dst: &T, store: &mut MappingStore) -> Result<()> {
        for stage in &self.stages {
            #[cfg(feature = "tracing")]
            let before = store.len();
            stage.match_trees(src, dst, store)?;
            debug!(
                stage = stage.name(),
                before,
                after = store.len(),
                "stage finished"
            );
        }
        Ok(())
    }
}

impl<T: DiffTree + Sync + 'static> Pipeline<T> {
    /// Pipeline of the given stages. Fails if `config` does not validate.
    pub fn from_stages(
        stages: &[Stage],
        config: &MatcherConfig,
        labels: Arc<LabelConfiguration>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(
            stages.iter().map(|s| s.build(config, &labels)).collect(),
        ))
    }

    /// One of the published compositions.
    pub fn preset(
        preset: Preset,
        config: &MatcherConfig,
        labels: Arc<LabelConfiguration>,
    ) -> Result<Self> {
        Self::from_stages(preset.stages(), config, labels)
    }

    /// Pipeline from comma-separated stage names, e.g.
    /// `"identical,cd-leaves,cd-bottom-up"`.
    pub fn from_names(
        names: &str,
        config: &MatcherConfig,
        labels: Arc<LabelConfiguration>,
    ) -> Result<Self> {
        let stages = names
            .split(',')
            .filter(|n| !n.trim().is_empty())
            .map(str::parse)
            .collect::<Result<Vec<Stage>>>()?;
        if stages.is_empty() {
            return Err(MatchError::Configuration("empty stage list".into()));
        }
        Self::from_stages(&stages, config, labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notation::TypeTable;

    fn labels() -> Arc<LabelConfiguration> {
        Arc::new(LabelConfiguration::default())
    }

    #[test]
    fn test_stage_names_round_trip() {
        for stage in Stage::ALL {
            assert_eq!(stage.name().parse::<Stage>().unwrap(), stage);
            assert_eq!(stage.to_string(), stage.name());
        }
        assert_eq!("leaves".parse::<Stage>().unwrap(), Stage::Leaves);
        assert_eq!("optimal".parse::<Stage>().unwrap(), Stage::Optimal);
        assert!(matches!(
            "bogus".parse::<Stage>(),
            Err(MatchError::Configuration(_))
        ));
    }

    #[test]
    fn test_preset_compositions() {
        assert_eq!(Preset::Cd.stages(), [Stage::ParallelLeaves, Stage::BottomUp]);
        assert_eq!(
            Preset::CdAbcde.stages(),
            [
                Stage::Identical,
                Stage::ParallelLeaves,
                Stage::BottomUp,
                Stage::Lcs,
                Stage::Repair
            ]
        );
        assert_eq!(
            Preset::CdOpt.stages(),
            [Stage::Identical, Stage::Optimized, Stage::Lcs, Stage::Repair]
        );
        assert_eq!(Preset::RtedB.stages(), [Stage::Optimal, Stage::Lcs]);
        assert_eq!("cd_abcde".parse::<Preset>().unwrap(), Preset::CdAbcde);
        for preset in Preset::ALL {
            assert_eq!(preset.name().parse::<Preset>().unwrap(), preset);
        }
    }

    #[test]
    fn test_from_names() {
        let config = MatcherConfig::default();
        let pipeline: Pipeline =
            Pipeline::from_names("identical, cd-leaves ,cd-bottom-up", &config, labels()).unwrap();
        assert_eq!(
            pipeline.stage_names(),
            ["identical", "cd-leaves", "cd-bottom-up"]
        );

        let err = Pipeline::<Tree>::from_names("identical,nope", &config, labels()).unwrap_err();
        assert_eq!(err, MatchError::Configuration("unknown stage `nope`".into()));
        assert!(Pipeline::<Tree>::from_names(" , ", &config, labels()).is_err());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = MatcherConfig::default().with_leaf_threshold(2.0);
        assert!(matches!(
            Pipeline::<Tree>::preset(Preset::Cd, &config, labels()),
            Err(MatchError::Configuration(_))
        ));
    }

    #[test]
    fn test_leaves_only_on_dummy_pair() {
        let mut types = TypeTable::new();
        let src = types.parse("a(b(c,d),e)").unwrap();
        let dst = types.parse("a(f(b(c,d),h(i)),j)").unwrap();
        let pipeline: Pipeline =
            Pipeline::from_stages(&[Stage::Leaves], &MatcherConfig::default(), labels()).unwrap();
        let store = pipeline.run(&src, &dst).unwrap();
        let mapped: Vec<(&str, &str)> = store
            .pairs()
            .map(|m| (src.label(m.src), dst.label(m.dst)))
            .collect();
        assert_eq!(mapped, [("c", "c"), ("d", "d")]);
    }

    #[test]
    fn test_every_preset_yields_a_bijection() {
        let mut types = TypeTable::new();
        let src = types.parse("a(b(c,d),e,f(g(h(i,j,k)),l(m)))").unwrap();
        let dst = types.parse("a(f(g(h(i,k)),l(m,n)),b(d,c),e)").unwrap();
        for preset in Preset::ALL {
            let config = MatcherConfig::default().with_workers(2);
            let pipeline: Pipeline = Pipeline::preset(preset, &config, labels()).unwrap();
            let store = pipeline.run(&src, &dst).unwrap();
            assert!(store.check_bijective(), "{preset}");
        }
    }
}
