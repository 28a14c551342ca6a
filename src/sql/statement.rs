//! Parsed statement model consumed by routing, rewriting and merging.

use super::lexer::Span;

/// Statement category, decided by the leading keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// SELECT
    Dql,
    /// INSERT / UPDATE / DELETE
    Dml,
    /// CREATE / ALTER / DROP / TRUNCATE
    Ddl,
    /// GRANT / REVOKE
    Dcl,
    /// BEGIN / COMMIT / ROLLBACK / SAVEPOINT / SET AUTOCOMMIT
    Tcl,
    /// SHOW / DESCRIBE / USE
    Dal,
}

/// One occurrence of a table name in the SQL text.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSegment {
    pub name: String,
    pub alias: Option<String>,
    pub span: Span,
    /// true when the occurrence qualifies a column (`t_order.id`)
    pub is_owner: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SqlStatement {
    Select(SelectStatement),
    Insert(InsertStatement),
    Update(UpdateStatement),
    Delete(DeleteStatement),
    Ddl(DdlStatement),
    Dcl(DclStatement),
    Tcl(TclStatement),
    Dal(DalStatement),
}

impl SqlStatement {
    pub fn kind(&self) -> StatementKind {
        match self {
            SqlStatement::Select(_) => StatementKind::Dql,
            SqlStatement::Insert(_) | SqlStatement::Update(_) | SqlStatement::Delete(_) => {
                StatementKind::Dml
            }
            SqlStatement::Ddl(_) => StatementKind::Ddl,
            SqlStatement::Dcl(_) => StatementKind::Dcl,
            SqlStatement::Tcl(_) => StatementKind::Tcl,
            SqlStatement::Dal(_) => StatementKind::Dal,
        }
    }

    /// Every table occurrence, including column owners.
    pub fn table_segments(&self) -> &[TableSegment] {
        match self {
            SqlStatement::Select(s) => &s.tables,
            SqlStatement::Insert(s) => std::slice::from_ref(&s.table),
            SqlStatement::Update(s) => &s.tables,
            SqlStatement::Delete(s) => &s.tables,
            SqlStatement::Ddl(s) => &s.tables,
            SqlStatement::Dcl(s) => &s.tables,
            SqlStatement::Dal(s) => &s.tables,
            SqlStatement::Tcl(_) => &[],
        }
    }

    /// Distinct table names referenced in FROM/JOIN/INTO position, in order of appearance.
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for segment in self.table_segments().iter().filter(|t| !t.is_owner) {
            if !names.iter().any(|n| n.eq_ignore_ascii_case(&segment.name)) {
                names.push(segment.name.clone());
            }
        }
        names
    }

    pub fn where_clause(&self) -> Option<&SqlExpr> {
        match self {
            SqlStatement::Select(s) => s.where_clause.as_ref(),
            SqlStatement::Update(s) => s.where_clause.as_ref(),
            SqlStatement::Delete(s) => s.where_clause.as_ref(),
            _ => None,
        }
    }

    /// Reads never modify data; everything else is routed as a write.
    pub fn is_read_only(&self) -> bool {
        matches!(self, SqlStatement::Select(_) | SqlStatement::Dal(_))
    }

    pub fn parameter_count(&self) -> usize {
        match self {
            SqlStatement::Select(s) => s.parameter_count,
            SqlStatement::Insert(s) => s.parameter_count,
            SqlStatement::Update(s) => s.parameter_count,
            SqlStatement::Delete(s) => s.parameter_count,
            _ => 0,
        }
    }

    /// Resolve a table alias (or the name itself) to the table name.
    pub fn resolve_table(&self, owner: &str) -> Option<&str> {
        self.table_segments()
            .iter()
            .filter(|t| !t.is_owner)
            .find(|t| {
                t.name.eq_ignore_ascii_case(owner)
                    || t.alias.as_deref().is_some_and(|a| a.eq_ignore_ascii_case(owner))
            })
            .map(|t| t.name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    pub distinct: bool,
    pub projections: Vec<Projection>,
    /// byte offset right after the last projection, where derived columns are appended
    pub projections_end: usize,
    pub tables: Vec<TableSegment>,
    pub joins: Vec<JoinClause>,
    pub where_clause: Option<SqlExpr>,
    pub group_by: Vec<OrderItem>,
    pub having: Option<SqlExpr>,
    pub order_by: Vec<OrderItem>,
    pub limit: Option<Limit>,
    pub parameter_count: usize,
}

impl SelectStatement {
    pub fn has_star(&self) -> bool {
        self.projections
            .iter()
            .any(|p| matches!(p, Projection::Star { .. }))
    }

    pub fn aggregations(&self) -> impl Iterator<Item = (usize, &Projection)> {
        self.projections
            .iter()
            .enumerate()
            .filter(|(_, p)| matches!(p, Projection::Aggregate { .. }))
    }

    pub fn has_aggregation(&self) -> bool {
        self.aggregations().next().is_some()
    }

    pub fn has_distinct_aggregation(&self) -> bool {
        self.aggregations()
            .any(|(_, p)| matches!(p, Projection::Aggregate { distinct: true, .. }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    pub join_type: JoinType,
    pub table: String,
    pub alias: Option<String>,
    pub on_condition: SqlExpr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregationType {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregationType {
    pub fn name(&self) -> &'static str {
        match self {
            AggregationType::Count => "COUNT",
            AggregationType::Sum => "SUM",
            AggregationType::Avg => "AVG",
            AggregationType::Min => "MIN",
            AggregationType::Max => "MAX",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    Star {
        owner: Option<String>,
    },
    Column {
        owner: Option<String>,
        name: String,
        alias: Option<String>,
    },
    Aggregate {
        function: AggregationType,
        distinct: bool,
        /// argument text as written, e.g. `*` or `o.price`
        argument: String,
        /// expression text as written, e.g. `COUNT(*)`
        text: String,
        alias: Option<String>,
    },
    Expression {
        text: String,
        alias: Option<String>,
    },
}

impl Projection {
    pub fn alias(&self) -> Option<&str> {
        match self {
            Projection::Star { .. } => None,
            Projection::Column { alias, .. }
            | Projection::Aggregate { alias, .. }
            | Projection::Expression { alias, .. } => alias.as_deref(),
        }
    }

    /// Label the database reports for this projection.
    pub fn label(&self) -> Option<String> {
        if let Some(alias) = self.alias() {
            return Some(alias.to_string());
        }
        match self {
            Projection::Star { .. } => None,
            Projection::Column { name, .. } => Some(name.clone()),
            Projection::Aggregate { text, .. } | Projection::Expression { text, .. } => {
                Some(text.clone())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullsOrder {
    First,
    Last,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OrderTarget {
    Column { owner: Option<String>, name: String },
    /// 1-based position in the projection list
    Ordinal(usize),
    Expression(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub target: OrderTarget,
    pub direction: OrderDirection,
    pub nulls: Option<NullsOrder>,
}

impl OrderItem {
    pub fn column(name: &str, direction: OrderDirection) -> Self {
        Self {
            target: OrderTarget::Column {
                owner: None,
                name: name.to_string(),
            },
            direction,
            nulls: None,
        }
    }

    /// Nulls sort first for ascending order and last for descending unless stated.
    pub fn nulls_first(&self) -> bool {
        match self.nulls {
            Some(NullsOrder::First) => true,
            Some(NullsOrder::Last) => false,
            None => self.direction == OrderDirection::Asc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationValue {
    Literal { value: i64, span: Span },
    Parameter { index: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Limit {
    pub row_count: Option<PaginationValue>,
    pub offset: Option<PaginationValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertRow {
    pub values: Vec<SqlExpr>,
    /// span covering `( ... )`
    pub span: Span,
    /// index of the first parameter marker inside this row
    pub first_parameter: usize,
    pub parameter_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    pub table: TableSegment,
    pub columns: Option<Vec<String>>,
    pub rows: Vec<InsertRow>,
    pub parameter_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStatement {
    pub tables: Vec<TableSegment>,
    pub assignments: Vec<(String, SqlExpr)>,
    pub where_clause: Option<SqlExpr>,
    pub parameter_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStatement {
    pub tables: Vec<TableSegment>,
    pub where_clause: Option<SqlExpr>,
    pub parameter_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DdlOperation {
    Create,
    Alter,
    Drop,
    Truncate,
    CreateIndex,
    DropIndex,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DdlStatement {
    pub operation: DdlOperation,
    pub tables: Vec<TableSegment>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DclStatement {
    pub tables: Vec<TableSegment>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TclStatement {
    Begin,
    Commit,
    Rollback,
    Savepoint(String),
    SetAutoCommit(bool),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DalStatement {
    pub keyword: String,
    pub tables: Vec<TableSegment>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SqlExpr {
    Column {
        owner: Option<String>,
        name: String,
    },
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    Null,
    /// 0-based index of a `?` marker
    Parameter(usize),

    BinaryOp {
        left: Box<SqlExpr>,
        op: BinaryOp,
        right: Box<SqlExpr>,
    },

    Not(Box<SqlExpr>),
    Negate(Box<SqlExpr>),
    IsNull(Box<SqlExpr>),
    IsNotNull(Box<SqlExpr>),

    Between {
        expr: Box<SqlExpr>,
        low: Box<SqlExpr>,
        high: Box<SqlExpr>,
        negated: bool,
    },
    InList {
        expr: Box<SqlExpr>,
        list: Vec<SqlExpr>,
        negated: bool,
    },

    Function {
        name: String,
        args: Vec<SqlExpr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
    Like,
}
