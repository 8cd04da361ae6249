//! Recursive-descent, precedence-climbing parser. Turns a token
//! stream into the statement tree in `ast`.

use crate::core::{DataType, DbError, Result, Value};
use crate::parser::ast::*;
use crate::parser::lexer::{Keyword, Lexer, SpannedToken, Token};

pub fn parse(sql: &str) -> Result<Statement> {
    let tokens = Lexer::new(sql).tokenize()?;
    let mut p = Parser { tokens, pos: 0 };
    let stmt = p.parse_statement()?;
    p.expect_stmt_end()?;
    Ok(stmt)
}

struct Parser {
    tokens: Vec<SpannedToken>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos].token
    }

    fn peek_pos(&self) -> usize {
        self.tokens[self.pos].pos
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens[self.pos].token.clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn err(&self, msg: impl Into<String>) -> DbError {
        DbError::ParseError(format!("{} at position {}", msg.into(), self.peek_pos()))
    }

    fn expect_kw(&mut self, kw: Keyword) -> Result<()> {
        if *self.peek() == Token::Keyword(kw) {
            self.advance();
            Ok(())
        } else {
            Err(self.err(format!("expected keyword {kw:?}")))
        }
    }

    fn eat_kw(&mut self, kw: Keyword) -> bool {
        if *self.peek() == Token::Keyword(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: Token) -> Result<()> {
        if *self.peek() == tok {
            self.advance();
            Ok(())
        } else {
            Err(self.err(format!("expected {tok:?}, found {:?}", self.peek())))
        }
    }

    fn eat(&mut self, tok: &Token) -> bool {
        if self.peek() == tok {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_stmt_end(&mut self) -> Result<()> {
        self.eat(&Token::Semicolon);
        if *self.peek() != Token::Eof {
            return Err(self.err(format!("unexpected trailing token {:?}", self.peek())));
        }
        Ok(())
    }

    fn ident(&mut self) -> Result<String> {
        match self.advance() {
            Token::Ident(s) => Ok(s),
            Token::QuotedIdent(s) => Ok(s),
            other => Err(DbError::ParseError(format!(
                "expected identifier, found {other:?} at position {}",
                self.peek_pos()
            ))),
        }
    }

    fn parse_statement(&mut self) -> Result<Statement> {
        match self.peek().clone() {
            Token::Keyword(Keyword::Create) => self.parse_create(),
            Token::Keyword(Keyword::Drop) => self.parse_drop(),
            Token::Keyword(Keyword::Alter) => self.parse_alter(),
            Token::Keyword(Keyword::Insert) => self.parse_insert().map(Statement::Insert),
            Token::Keyword(Keyword::Select) => self.parse_query().map(Statement::Query),
            Token::Keyword(Keyword::Update) => self.parse_update().map(Statement::Update),
            Token::Keyword(Keyword::Delete) => self.parse_delete().map(Statement::Delete),
            Token::Keyword(Keyword::Begin) => {
                self.advance();
                Ok(Statement::Begin)
            }
            Token::Keyword(Keyword::Commit) => {
                self.advance();
                Ok(Statement::Commit)
            }
            Token::Keyword(Keyword::Rollback) => {
                self.advance();
                Ok(Statement::Rollback)
            }
            other => Err(self.err(format!("unexpected token {other:?} at start of statement"))),
        }
    }

    fn parse_create(&mut self) -> Result<Statement> {
        self.advance(); // CREATE
        if self.eat_kw(Keyword::Unique) {
            self.expect_kw(Keyword::Index)?;
            return self.parse_create_index(true).map(Statement::CreateIndex);
        }
        if self.eat_kw(Keyword::Index) {
            return self.parse_create_index(false).map(Statement::CreateIndex);
        }
        self.expect_kw(Keyword::Table)?;
        let table_name = self.ident()?;
        self.expect(Token::LParen)?;
        let mut columns = Vec::new();
        loop {
            columns.push(self.parse_column_def()?);
            if self.eat(&Token::Comma) {
                continue;
            }
            break;
        }
        self.expect(Token::RParen)?;
        Ok(Statement::CreateTable(CreateTableStmt { table_name, columns }))
    }

    fn parse_column_def(&mut self) -> Result<ColumnDef> {
        let name = self.ident()?;
        let data_type = self.parse_data_type()?;
        let mut not_null = false;
        let mut primary_key = false;
        loop {
            if self.eat_kw(Keyword::Not) {
                self.expect_kw(Keyword::Null)?;
                not_null = true;
            } else if self.eat_kw(Keyword::Primary) {
                self.expect_kw(Keyword::Key)?;
                primary_key = true;
                not_null = true;
            } else {
                break;
            }
        }
        Ok(ColumnDef { name, data_type, not_null, primary_key })
    }

    fn parse_data_type(&mut self) -> Result<DataType> {
        match self.advance() {
            Token::Keyword(Keyword::Integer) => Ok(DataType::Integer),
            Token::Keyword(Keyword::Float) => Ok(DataType::Float),
            Token::Keyword(Keyword::Text) => Ok(DataType::Text),
            Token::Keyword(Keyword::Boolean) => Ok(DataType::Boolean),
            Token::Keyword(Keyword::Timestamp) => Ok(DataType::Timestamp),
            Token::Ident(name) => DataType::from_name(&name)
                .ok_or_else(|| DbError::ParseError(format!("unknown data type \"{name}\""))),
            other => Err(DbError::ParseError(format!("expected data type, found {other:?}"))),
        }
    }

    fn parse_create_index(&mut self, unique: bool) -> Result<CreateIndexStmt> {
        let index_name = self.ident()?;
        self.expect_kw(Keyword::On)?;
        let table_name = self.ident()?;
        self.expect(Token::LParen)?;
        let column = self.ident()?;
        self.expect(Token::RParen)?;
        Ok(CreateIndexStmt { index_name, table_name, column, unique })
    }

    fn parse_drop(&mut self) -> Result<Statement> {
        self.advance(); // DROP
        if self.eat_kw(Keyword::Table) {
            let table_name = self.ident()?;
            return Ok(Statement::DropTable(DropTableStmt { table_name }));
        }
        if self.eat_kw(Keyword::Index) {
            let index_name = self.ident()?;
            return Ok(Statement::DropIndex(DropIndexStmt { index_name }));
        }
        Err(self.err("expected TABLE or INDEX after DROP"))
    }

    fn parse_alter(&mut self) -> Result<Statement> {
        self.advance(); // ALTER
        self.expect_kw(Keyword::Table)?;
        let table_name = self.ident()?;
        let operation = if self.eat_kw(Keyword::Add) {
            self.eat_kw(Keyword::Column);
            AlterTableOperation::AddColumn(self.parse_column_def()?)
        } else if self.eat_kw(Keyword::Drop) {
            self.eat_kw(Keyword::Column);
            AlterTableOperation::DropColumn(self.ident()?)
        } else {
            return Err(self.err("expected ADD or DROP after ALTER TABLE name"));
        };
        Ok(Statement::AlterTable(AlterTableStmt { table_name, operation }))
    }

    fn parse_insert(&mut self) -> Result<InsertStmt> {
        self.advance(); // INSERT
        self.expect_kw(Keyword::Into)?;
        let table_name = self.ident()?;
        let columns = if self.eat(&Token::LParen) {
            let mut cols = Vec::new();
            loop {
                cols.push(self.ident()?);
                if self.eat(&Token::Comma) {
                    continue;
                }
                break;
            }
            self.expect(Token::RParen)?;
            Some(cols)
        } else {
            None
        };
        self.expect_kw(Keyword::Values)?;
        let mut values = Vec::new();
        loop {
            self.expect(Token::LParen)?;
            let mut row = Vec::new();
            loop {
                row.push(self.parse_expr()?);
                if self.eat(&Token::Comma) {
                    continue;
                }
                break;
            }
            self.expect(Token::RParen)?;
            values.push(row);
            if self.eat(&Token::Comma) {
                continue;
            }
            break;
        }
        Ok(InsertStmt { table_name, columns, values })
    }

    fn parse_update(&mut self) -> Result<UpdateStmt> {
        self.advance(); // UPDATE
        let table_name = self.ident()?;
        self.expect_kw(Keyword::Set)?;
        let mut assignments = Vec::new();
        loop {
            let column = self.ident()?;
            self.expect(Token::Eq)?;
            let value = self.parse_expr()?;
            assignments.push(Assignment { column, value });
            if self.eat(&Token::Comma) {
                continue;
            }
            break;
        }
        let selection = if self.eat_kw(Keyword::Where) { Some(self.parse_expr()?) } else { None };
        Ok(UpdateStmt { table_name, assignments, selection })
    }

    fn parse_delete(&mut self) -> Result<DeleteStmt> {
        self.advance(); // DELETE
        self.expect_kw(Keyword::From)?;
        let table_name = self.ident()?;
        let selection = if self.eat_kw(Keyword::Where) { Some(self.parse_expr()?) } else { None };
        Ok(DeleteStmt { table_name, selection })
    }

    fn parse_query(&mut self) -> Result<QueryStmt> {
        self.advance(); // SELECT
        let mut projection = Vec::new();
        loop {
            projection.push(self.parse_select_item()?);
            if self.eat(&Token::Comma) {
                continue;
            }
            break;
        }

        let mut from = Vec::new();
        if self.eat_kw(Keyword::From) {
            loop {
                from.push(self.parse_table_with_joins()?);
                if self.eat(&Token::Comma) {
                    continue;
                }
                break;
            }
        }

        let selection = if self.eat_kw(Keyword::Where) { Some(self.parse_expr()?) } else { None };

        let mut order_by = Vec::new();
        if self.eat_kw(Keyword::Order) {
            self.expect_kw(Keyword::By)?;
            loop {
                let expr = self.parse_expr()?;
                let descending = if self.eat_kw(Keyword::Desc) {
                    true
                } else {
                    self.eat_kw(Keyword::Asc);
                    false
                };
                order_by.push(OrderByExpr { expr, descending });
                if self.eat(&Token::Comma) {
                    continue;
                }
                break;
            }
        }

        let limit = if self.eat_kw(Keyword::Limit) { Some(self.parse_signed_int()?) } else { None };
        let offset = if self.eat_kw(Keyword::Offset) { Some(self.parse_signed_int()?) } else { None };

        if from.len() > 1 || from.iter().any(|t| !t.joins.is_empty()) {
            for t in &from {
                if t.relation.indexed_by.is_some()
                    || t.joins.iter().any(|j| j.relation.indexed_by.is_some())
                {
                    return Err(DbError::ParseError(
                        "INDEXED BY is only valid on a single, unjoined table reference".into(),
                    ));
                }
            }
        }

        Ok(QueryStmt { projection, from, selection, order_by, limit, offset })
    }

    fn parse_signed_int(&mut self) -> Result<i64> {
        let negative = self.eat(&Token::Minus);
        match self.advance() {
            Token::IntLiteral(n) => Ok(if negative { -n } else { n }),
            other => Err(DbError::ParseError(format!("expected integer literal, found {other:?}"))),
        }
    }

    fn parse_select_item(&mut self) -> Result<SelectItem> {
        if *self.peek() == Token::Star {
            self.advance();
            return Ok(SelectItem::Wildcard);
        }
        let expr = self.parse_expr()?;
        let alias = if self.eat_kw(Keyword::As) {
            Some(self.ident()?)
        } else if let Token::Ident(_) = self.peek() {
            Some(self.ident()?)
        } else {
            None
        };
        Ok(SelectItem::Expr { expr, alias })
    }

    fn parse_table_with_joins(&mut self) -> Result<TableWithJoins> {
        let relation = self.parse_table_factor()?;
        let mut joins = Vec::new();
        loop {
            if self.eat_kw(Keyword::Cross) {
                self.expect_kw(Keyword::Join)?;
                let rel = self.parse_table_factor()?;
                joins.push(Join { relation: rel, on: None });
                continue;
            }
            let is_join = if self.eat_kw(Keyword::Inner) {
                self.expect_kw(Keyword::Join)?;
                true
            } else {
                self.eat_kw(Keyword::Join)
            };
            if is_join {
                let rel = self.parse_table_factor()?;
                self.expect_kw(Keyword::On)?;
                let on = self.parse_expr()?;
                joins.push(Join { relation: rel, on: Some(on) });
                continue;
            }
            break;
        }
        Ok(TableWithJoins { relation, joins })
    }

    fn parse_table_factor(&mut self) -> Result<TableFactor> {
        let name = self.ident()?;
        let alias = if self.eat_kw(Keyword::As) {
            Some(self.ident()?)
        } else if let Token::Ident(_) = self.peek() {
            Some(self.ident()?)
        } else {
            None
        };
        let indexed_by = if alias.is_none() && self.eat_kw(Keyword::Indexed) {
            self.expect_kw(Keyword::By)?;
            Some(self.ident()?)
        } else {
            None
        };
        Ok(TableFactor { name, alias, indexed_by })
    }

    // Precedence (lowest to highest): OR -> AND -> NOT -> comparison/LIKE/
    // ILIKE/IN/IS NULL -> +/-/|| -> * / % -> unary - -> :: (cast) -> primary.
    fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while self.eat_kw(Keyword::Or) {
            let right = self.parse_and()?;
            left = Expr::BinaryOp { left: Box::new(left), op: BinaryOp::Or, right: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_not()?;
        while self.eat_kw(Keyword::And) {
            let right = self.parse_not()?;
            left = Expr::BinaryOp { left: Box::new(left), op: BinaryOp::And, right: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if self.eat_kw(Keyword::Not) {
            let expr = self.parse_not()?;
            return Ok(Expr::Not { expr: Box::new(expr) });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let left = self.parse_additive()?;

        if self.eat_kw(Keyword::Is) {
            let negated = self.eat_kw(Keyword::Not);
            self.expect_kw(Keyword::Null)?;
            return Ok(Expr::IsNull { expr: Box::new(left), negated });
        }

        let negated = self.eat_kw(Keyword::Not);
        if self.eat_kw(Keyword::Like) {
            return self.finish_like(left, negated, false);
        }
        if self.eat_kw(Keyword::Ilike) {
            return self.finish_like(left, negated, true);
        }
        if self.eat_kw(Keyword::In) {
            self.expect(Token::LParen)?;
            let mut list = Vec::new();
            if *self.peek() != Token::RParen {
                loop {
                    list.push(self.parse_expr()?);
                    if self.eat(&Token::Comma) {
                        continue;
                    }
                    break;
                }
            }
            self.expect(Token::RParen)?;
            return Ok(Expr::In { expr: Box::new(left), list, negated });
        }
        if negated {
            return Err(self.err("expected LIKE, ILIKE or IN after NOT"));
        }

        let op = match self.peek() {
            Token::Eq => Some(BinaryOp::Eq),
            Token::NotEq => Some(BinaryOp::NotEq),
            Token::Lt => Some(BinaryOp::Lt),
            Token::LtEq => Some(BinaryOp::LtEq),
            Token::Gt => Some(BinaryOp::Gt),
            Token::GtEq => Some(BinaryOp::GtEq),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let right = self.parse_additive()?;
            return Ok(Expr::BinaryOp { left: Box::new(left), op, right: Box::new(right) });
        }

        Ok(left)
    }

    fn finish_like(&mut self, left: Expr, negated: bool, case_insensitive: bool) -> Result<Expr> {
        let pattern = self.parse_additive()?;
        let escape = if self.eat_kw(Keyword::Escape) {
            match self.advance() {
                Token::StringLiteral(s) if s.chars().count() == 1 => s.chars().next(),
                other => {
                    return Err(DbError::ParseError(format!(
                        "ESCAPE expects a single-character string literal, found {other:?}"
                    )))
                }
            }
        } else {
            None
        };
        Ok(Expr::Like {
            expr: Box::new(left),
            pattern: Box::new(pattern),
            negated,
            case_insensitive,
            escape,
        })
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Subtract,
                Token::Concat => BinaryOp::Concat,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::BinaryOp { left: Box::new(left), op, right: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinaryOp::Multiply,
                Token::Slash => BinaryOp::Divide,
                Token::Percent => BinaryOp::Modulo,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::BinaryOp { left: Box::new(left), op, right: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.eat(&Token::Minus) {
            let expr = self.parse_unary()?;
            return Ok(Expr::UnaryOp { op: UnaryOp::Minus, expr: Box::new(expr) });
        }
        if self.eat(&Token::Plus) {
            let expr = self.parse_unary()?;
            return Ok(Expr::UnaryOp { op: UnaryOp::Plus, expr: Box::new(expr) });
        }
        self.parse_cast()
    }

    fn parse_cast(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(&Token::DoubleColon) {
                let target = self.parse_data_type()?;
                expr = Expr::Cast { expr: Box::new(expr), target };
                continue;
            }
            break;
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.advance() {
            Token::Keyword(Keyword::Null) => Ok(Expr::Literal(Value::Null)),
            Token::Keyword(Keyword::True) => Ok(Expr::Literal(Value::Boolean(true))),
            Token::Keyword(Keyword::False) => Ok(Expr::Literal(Value::Boolean(false))),
            Token::Keyword(Keyword::Cast) => {
                self.expect(Token::LParen)?;
                let expr = self.parse_expr()?;
                self.expect_kw(Keyword::As)?;
                let target = self.parse_data_type()?;
                self.expect(Token::RParen)?;
                Ok(Expr::Cast { expr: Box::new(expr), target })
            }
            Token::IntLiteral(n) => Ok(Expr::Literal(Value::Integer(n))),
            Token::FloatLiteral(f) => Ok(Expr::Literal(Value::Float(f))),
            Token::StringLiteral(s) => Ok(Expr::Literal(Value::Text(s))),
            Token::Minus => {
                let inner = self.parse_unary()?;
                Ok(Expr::UnaryOp { op: UnaryOp::Minus, expr: Box::new(inner) })
            }
            Token::LParen => {
                let expr = self.parse_expr()?;
                self.expect(Token::RParen)?;
                Ok(expr)
            }
            Token::Ident(name) | Token::QuotedIdent(name) => {
                if self.eat(&Token::LParen) {
                    let mut args = Vec::new();
                    if *self.peek() != Token::RParen {
                        if *self.peek() == Token::Star {
                            self.advance();
                            args.push(Expr::Literal(Value::Integer(1)));
                        } else {
                            loop {
                                args.push(self.parse_expr()?);
                                if self.eat(&Token::Comma) {
                                    continue;
                                }
                                break;
                            }
                        }
                    }
                    self.expect(Token::RParen)?;
                    return Ok(Expr::Function { name: name.to_ascii_uppercase(), args });
                }
                if self.eat(&Token::Dot) {
                    let col = self.ident()?;
                    return Ok(Expr::CompoundIdentifier(vec![name, col]));
                }
                Ok(Expr::Column(name))
            }
            other => Err(DbError::ParseError(format!(
                "unexpected token {other:?} at position {}",
                self.peek_pos()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_create_table_with_primary_key() {
        let stmt = parse("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT NOT NULL)").unwrap();
        match stmt {
            Statement::CreateTable(c) => {
                assert_eq!(c.table_name, "t");
                assert_eq!(c.columns.len(), 2);
                assert!(c.columns[0].primary_key);
                assert!(c.columns[1].not_null);
            }
            _ => panic!("wrong statement"),
        }
    }

    #[test]
    fn parses_select_with_join_and_order_by() {
        let stmt = parse(
            "SELECT a.x, b.y FROM a JOIN b ON a.id = b.a_id WHERE a.x > 1 ORDER BY a.x DESC LIMIT 10 OFFSET 5",
        )
        .unwrap();
        match stmt {
            Statement::Query(q) => {
                assert_eq!(q.from.len(), 1);
                assert_eq!(q.from[0].joins.len(), 1);
                assert_eq!(q.limit, Some(10));
                assert_eq!(q.offset, Some(5));
                assert!(q.order_by[0].descending);
            }
            _ => panic!("wrong statement"),
        }
    }

    #[test]
    fn parses_cross_join_via_comma() {
        let stmt = parse("SELECT * FROM a, b").unwrap();
        match stmt {
            Statement::Query(q) => assert_eq!(q.from.len(), 2),
            _ => panic!("wrong statement"),
        }
    }

    #[test]
    fn parses_indexed_by_on_single_table() {
        let stmt = parse("SELECT * FROM t INDEXED BY idx_name WHERE x = 1").unwrap();
        match stmt {
            Statement::Query(q) => assert_eq!(q.from[0].relation.indexed_by.as_deref(), Some("idx_name")),
            _ => panic!("wrong statement"),
        }
    }

    #[test]
    fn rejects_indexed_by_in_a_join() {
        let err = parse("SELECT * FROM a INDEXED BY idx JOIN b ON a.id = b.id");
        assert!(err.is_err());
    }

    #[test]
    fn parses_precedence_and_or_not() {
        let stmt = parse("SELECT * FROM t WHERE a = 1 OR b = 2 AND NOT c = 3").unwrap();
        match stmt {
            Statement::Query(q) => {
                let sel = q.selection.unwrap();
                match sel {
                    Expr::BinaryOp { op: BinaryOp::Or, .. } => {}
                    other => panic!("expected OR at top level, got {other:?}"),
                }
            }
            _ => panic!("wrong statement"),
        }
    }

    #[test]
    fn parses_cast_both_forms() {
        let stmt = parse("SELECT CAST(a AS INTEGER), b::TEXT FROM t").unwrap();
        match stmt {
            Statement::Query(q) => assert_eq!(q.projection.len(), 2),
            _ => panic!("wrong statement"),
        }
    }

    #[test]
    fn parses_in_list_and_negated_like() {
        let stmt = parse("SELECT * FROM t WHERE a IN (1, 2, 3) AND b NOT LIKE '%x%'").unwrap();
        match stmt {
            Statement::Query(q) => assert!(q.selection.is_some()),
            _ => panic!("wrong statement"),
        }
    }

    #[test]
    fn syntax_error_reports_position() {
        let err = parse("SELECT FROM").unwrap_err();
        match err {
            DbError::ParseError(msg) => assert!(msg.contains("position")),
            _ => panic!("expected ParseError"),
        }
    }
}
