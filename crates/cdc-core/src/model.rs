//! Model and feature-set selection (`spec.md` §4.1).
//!
//! A `ModelType` selects a constant `ModelFeatures` bitset once at
//! installation init; the bitset is consulted at decode and execute time
//! but never mutated afterward.

use bitflags::bitflags;

bitflags! {
    /// Feature bits recognized by the core, one per `spec.md` §4.1 entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ModelFeatures: u32 {
        const HAS_INTERLOCK_REG          = 0x0000_0001;
        const HAS_STATUS_AND_CONTROL_REG = 0x0000_0002;
        const HAS_MAINTENANCE_CHANNEL    = 0x0000_0004;
        const HAS_TWO_PORT_MUX           = 0x0000_0008;
        const HAS_CHANNEL_FLAG           = 0x0000_0010;
        const HAS_ERROR_FLAG             = 0x0000_0020;
        const HAS_RELOCATION_REG_SHORT   = 0x0000_0040;
        const HAS_RELOCATION_REG_LONG    = 0x0000_0080;
        const HAS_MICROSECOND_CLOCK      = 0x0000_0100;
        const HAS_INSTRUCTION_STACK      = 0x0000_0200;
        const HAS_ISTACK_PREFETCH        = 0x0000_0400;
        const HAS_CMU                    = 0x0000_0800;
        const HAS_FULL_RTC               = 0x0000_1000;
        const HAS_NO_CM_WRAP             = 0x0000_2000;
        const HAS_NO_CEJ_MEJ             = 0x0000_4000;
        const HAS_175_FLOAT              = 0x0000_8000;

        const IS_SERIES_6X00 = 0x0100_0000;
        const IS_SERIES_70   = 0x0200_0000;
        const IS_SERIES_170  = 0x0400_0000;
        const IS_SERIES_800  = 0x0800_0000;
    }
}

impl ModelFeatures {
    /// Either relocation-register width flag is set.
    #[must_use]
    pub const fn has_relocation_reg(self) -> bool {
        self.intersects(Self::HAS_RELOCATION_REG_SHORT.union(Self::HAS_RELOCATION_REG_LONG))
    }
}

/// A selectable mainframe model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelType {
    Model6400,
    Cyber73,
    Cyber173,
    Cyber175,
    Cyber840A,
    Cyber865,
}

impl ModelType {
    /// The feature bitset this model selects. Computed once at
    /// installation init and held constant afterward.
    #[must_use]
    pub const fn features(self) -> ModelFeatures {
        use ModelFeatures as F;
        match self {
            Self::Model6400 => F::IS_SERIES_6X00,
            Self::Cyber73 => F::IS_SERIES_70
                .union(F::HAS_INTERLOCK_REG)
                .union(F::HAS_STATUS_AND_CONTROL_REG)
                .union(F::HAS_CHANNEL_FLAG)
                .union(F::HAS_ERROR_FLAG)
                .union(F::HAS_RELOCATION_REG_SHORT)
                .union(F::HAS_CMU),
            Self::Cyber173 => F::IS_SERIES_170
                .union(F::HAS_INTERLOCK_REG)
                .union(F::HAS_STATUS_AND_CONTROL_REG)
                .union(F::HAS_CHANNEL_FLAG)
                .union(F::HAS_ERROR_FLAG)
                .union(F::HAS_RELOCATION_REG_LONG)
                .union(F::HAS_CMU)
                .union(F::HAS_MICROSECOND_CLOCK)
                .union(F::HAS_INSTRUCTION_STACK),
            Self::Cyber175 => F::IS_SERIES_170
                .union(F::HAS_INTERLOCK_REG)
                .union(F::HAS_STATUS_AND_CONTROL_REG)
                .union(F::HAS_CHANNEL_FLAG)
                .union(F::HAS_ERROR_FLAG)
                .union(F::HAS_RELOCATION_REG_LONG)
                .union(F::HAS_CMU)
                .union(F::HAS_MICROSECOND_CLOCK)
                .union(F::HAS_INSTRUCTION_STACK)
                .union(F::HAS_ISTACK_PREFETCH),
            Self::Cyber840A => F::IS_SERIES_800
                .union(F::HAS_INTERLOCK_REG)
                .union(F::HAS_STATUS_AND_CONTROL_REG)
                .union(F::HAS_CHANNEL_FLAG)
                .union(F::HAS_ERROR_FLAG)
                .union(F::HAS_RELOCATION_REG_LONG)
                .union(F::HAS_CMU)
                .union(F::HAS_MICROSECOND_CLOCK)
                .union(F::HAS_FULL_RTC)
                .union(F::HAS_INSTRUCTION_STACK)
                .union(F::HAS_ISTACK_PREFETCH)
                .union(F::HAS_NO_CM_WRAP),
            Self::Cyber865 => F::IS_SERIES_800
                .union(F::HAS_INTERLOCK_REG)
                .union(F::HAS_STATUS_AND_CONTROL_REG)
                .union(F::HAS_CHANNEL_FLAG)
                .union(F::HAS_ERROR_FLAG)
                .union(F::HAS_RELOCATION_REG_LONG)
                .union(F::HAS_CMU)
                .union(F::HAS_MICROSECOND_CLOCK)
                .union(F::HAS_FULL_RTC)
                .union(F::HAS_INSTRUCTION_STACK)
                .union(F::HAS_ISTACK_PREFETCH)
                .union(F::HAS_NO_CM_WRAP),
        }
    }

    /// The `01.4`/`01.5` RX/WX single-word ECS/UEM opcodes are active only
    /// on this specific model in the reference implementation — this is
    /// model-specific, not feature-flag-driven (`spec.md` §9 open question).
    #[must_use]
    pub const fn has_rx_wx(self) -> bool {
        matches!(self, Self::Cyber865)
    }

    /// `RPN` (read CPU P register) is 865-only on Series-800.
    #[must_use]
    pub const fn has_rpn(self) -> bool {
        matches!(self, Self::Cyber865)
    }

    /// Default PP count for this model (`spec.md` §6.4 allows 10|12|20|24;
    /// this is only the suggested default absent explicit configuration).
    #[must_use]
    pub const fn default_pp_count(self) -> u8 {
        match self {
            Self::Model6400 => 10,
            Self::Cyber73 | Self::Cyber173 | Self::Cyber175 => 20,
            Self::Cyber840A | Self::Cyber865 => 24,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_6400_is_series_6x00_and_has_no_cej_mej_equivalent_gating() {
        let f = ModelType::Model6400.features();
        assert!(f.contains(ModelFeatures::IS_SERIES_6X00));
        assert!(!f.contains(ModelFeatures::HAS_INSTRUCTION_STACK));
    }

    #[test]
    fn cyber175_has_prefetch_but_173_does_not() {
        assert!(ModelType::Cyber175.features().contains(ModelFeatures::HAS_ISTACK_PREFETCH));
        assert!(!ModelType::Cyber173.features().contains(ModelFeatures::HAS_ISTACK_PREFETCH));
    }

    #[test]
    fn only_865_has_rx_wx_among_series_800() {
        assert!(ModelType::Cyber865.has_rx_wx());
        assert!(!ModelType::Cyber840A.has_rx_wx());
    }

    #[test]
    fn series_800_models_widen_ecs_fields_when_flagged() {
        assert!(ModelType::Cyber840A.features().contains(ModelFeatures::IS_SERIES_800));
        assert!(ModelType::Cyber865.features().contains(ModelFeatures::IS_SERIES_800));
    }
}
