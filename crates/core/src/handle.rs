use std::{fmt, marker::PhantomData};

use crate::value::ParameterKind;

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub(crate) u32);

        impl $name {
            /// Returns the registration position of this handle.
            #[must_use]
            pub fn id(self) -> usize {
                self.0 as usize
            }

            pub(crate) fn from_usize(id: usize) -> Self {
                Self(u32::try_from(id).unwrap_or(u32::MAX))
            }
        }
    };
}

handle!(
    /// Handle to a registered unit tag.
    UnitId
);
handle!(
    /// Handle to a registered index set.
    IndexSetId
);
handle!(
    /// Handle to a registered parameter group.
    GroupId
);
handle!(
    /// Handle to a registered parameter, without its value kind.
    ParameterId
);
handle!(
    /// Handle to a registered input series.
    InputId
);
handle!(
    /// Handle to a registered equation.
    EquationId
);
handle!(
    /// Handle to a registered solver.
    SolverId
);

/// A parameter handle typed by the kind of value the parameter holds.
///
/// Reading a `Param<Double>` inside an equation yields an `f64`, reading a
/// `Param<Bool>` yields a `bool`, and so on.
pub struct Param<K> {
    id: ParameterId,
    _kind: PhantomData<K>,
}

impl<K: ParameterKind> Param<K> {
    pub(crate) fn new(id: ParameterId) -> Self {
        Self {
            id,
            _kind: PhantomData,
        }
    }

    /// Returns the untyped parameter handle.
    #[must_use]
    pub fn id(self) -> ParameterId {
        self.id
    }
}

impl<K> Clone for Param<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K> Copy for Param<K> {}

impl<K> PartialEq for Param<K> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<K> Eq for Param<K> {}

impl<K> fmt::Debug for Param<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Param").field(&self.id.0).finish()
    }
}

/// The three kinds of entity that own storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Parameter,
    Input,
    Result,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Parameter => "parameter",
            Self::Input => "input",
            Self::Result => "equation",
        })
    }
}
