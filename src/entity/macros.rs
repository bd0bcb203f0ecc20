/// Declare a request entity: the struct plus its cached plan.
///
/// ```
/// use portage::entity;
///
/// entity! {
///     /// List a user's tags.
///     pub struct ListTags {
///         method = GET;
///         path = "/user/{userID}/tags";
///         { user_id: u64, in: path, name: "userID", validate: "@uint[1,]" }
///         { q: String, in: query, name: "q", omitempty }
///         { size: u32, in: query, name: "size", default: "10", validate: "@uint[1,100]" }
///     }
/// }
/// ```
///
/// Each field line is `{ field: Type, in: placement, options.. }` where
/// placement is `path`, `query`, `header`, `cookie`, `body` or
/// `formData`. Options: `name: "wire"`, `validate: "@rule"`,
/// `default: "literal"`, `mime: "type/subtype"`, `required`, `omitempty`,
/// and `file` (directly after the placement) for upload-typed `formData`
/// fields. `method` and `path` may be omitted for entities only used with
/// caller-supplied routes.
#[macro_export]
macro_rules! entity {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(method = $method:ident;)?
            $(path = $path:literal;)?
            $({ $fname:ident : $fty:ty, in: $place:ident $($rest:tt)* })*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Default)]
        $vis struct $name {
            $(pub $fname: $fty,)*
        }

        impl $crate::Entity for $name {
            const ID: &'static str = stringify!($name);

            $(fn method() -> $crate::http::Method {
                $crate::http::Method::$method
            })?

            $(fn path() -> &'static str {
                $path
            })?

            fn plan() -> Result<&'static $crate::plan::Plan<Self>, $crate::PlanError> {
                static PLAN: ::std::sync::OnceLock<
                    Result<$crate::plan::Plan<$name>, $crate::PlanError>,
                > = ::std::sync::OnceLock::new();
                PLAN.get_or_init(|| {
                    $crate::plan::Plan::build(
                        <$name as $crate::Entity>::method(),
                        <$name as $crate::Entity>::path(),
                        vec![$($crate::entity!(@field $name, $fname : $fty, $place $($rest)*)),*],
                    )
                })
                .as_ref()
                .map_err(Clone::clone)
            }
        }
    };

    // ===== field construction =====

    (@field $ename:ident, $fname:ident : $fty:ty, formData, file $($rest:tt)*) => {
        $crate::entity!(@opts
            $crate::entity::Field::file(
                stringify!($fname),
                |e: &$ename| Some(&e.$fname),
                |e: &mut $ename, u| e.$fname = u,
            )
            $($rest)*
        )
    };
    (@field $ename:ident, $fname:ident : $fty:ty, $place:ident $($rest:tt)*) => {
        $crate::entity!(@opts
            $crate::entity::Field::value(
                stringify!($fname),
                $crate::entity!(@place $place),
                |e: &$ename| $crate::entity::pivot(&e.$fname),
                |e: &mut $ename, v| {
                    e.$fname = $crate::entity::from_pivot(v)?;
                    Ok(())
                },
            )
            $($rest)*
        )
    };

    // ===== placements =====

    (@place path) => { $crate::entity::Placement::Path };
    (@place query) => { $crate::entity::Placement::Query };
    (@place header) => { $crate::entity::Placement::Header };
    (@place cookie) => { $crate::entity::Placement::Cookie };
    (@place body) => { $crate::entity::Placement::Body };
    (@place formData) => { $crate::entity::Placement::FormData };

    // ===== options =====

    (@opts $f:expr) => { $f };
    (@opts $f:expr ,) => { $f };
    (@opts $f:expr , name: $v:literal $($rest:tt)*) => {
        $crate::entity!(@opts $f.name($v) $($rest)*)
    };
    (@opts $f:expr , validate: $v:literal $($rest:tt)*) => {
        $crate::entity!(@opts $f.validate($v) $($rest)*)
    };
    (@opts $f:expr , default: $v:literal $($rest:tt)*) => {
        $crate::entity!(@opts $f.default_value($v) $($rest)*)
    };
    (@opts $f:expr , mime: $v:literal $($rest:tt)*) => {
        $crate::entity!(@opts $f.mime($v) $($rest)*)
    };
    (@opts $f:expr , required $($rest:tt)*) => {
        $crate::entity!(@opts $f.required() $($rest)*)
    };
    (@opts $f:expr , omitempty $($rest:tt)*) => {
        $crate::entity!(@opts $f.omit_empty() $($rest)*)
    };
}
