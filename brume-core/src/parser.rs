//! Recursive-descent parser producing the concrete syntax tree in `ast`.

use crate::ast::{
    BinaryOp, Block, BlockRow, Expr, ExprKind, FieldDecl, FieldInit, FunctionDef, Ident, IfStmt,
    InstanceDef, Item, LetDecl, Module, Param, Statement, StatementKind, StructDecl,
    TypeclassDecl, UnaryOp,
};
use crate::error::CoreError;
use crate::lexer::{Token, TokenKind, lex};
use crate::span::FileId;

pub fn parse(file: FileId, source: &str) -> Result<Module, CoreError> {
    let lexed = lex(file, source);
    if let Some(diag) = lexed.diagnostics.first() {
        return Err(CoreError::LexError {
            position: diag.span.start as usize,
            message: diag.message.clone(),
        });
    }

    let mut parser = Parser {
        source,
        tokens: &lexed.tokens,
        position: 0,
    };
    parser.parse_module()
}

struct Parser<'a> {
    source: &'a str,
    tokens: &'a [Token],
    position: usize,
}

impl<'a> Parser<'a> {
    fn parse_module(&mut self) -> Result<Module, CoreError> {
        let start = self.peek().span;
        let mut items = Vec::new();
        while !self.at(TokenKind::Eof) {
            let exported = self.eat(TokenKind::Export).is_some();
            let statement = self.parse_statement()?;
            items.push(Item {
                exported,
                statement,
            });
        }
        let end = self.peek().span;
        Ok(Module {
            items,
            span: start.to(end),
        })
    }

    fn parse_block(&mut self, allow_value: bool) -> Result<Block, CoreError> {
        let open = self.expect(TokenKind::LBrace, "'{'")?;
        let mut rows = Vec::new();
        let mut value = None;

        loop {
            if let Some(close) = self.eat(TokenKind::RBrace) {
                return Ok(Block {
                    rows,
                    value,
                    span: open.span.to(close.span),
                });
            }
            if value.is_some() {
                return Err(self.error("expected '}' after block value expression"));
            }

            if self.at(TokenKind::LBrace) {
                rows.push(BlockRow::Block(self.parse_block(false)?));
                continue;
            }
            if self.starts_declaration() {
                rows.push(BlockRow::Statement(self.parse_statement()?));
                continue;
            }

            let expr = self.parse_expr(true)?;
            if let Some(semi) = self.eat(TokenKind::Semi) {
                let span = expr.span.to(semi.span);
                rows.push(BlockRow::Statement(Statement {
                    kind: StatementKind::Expr(expr),
                    span,
                }));
            } else if allow_value && self.at(TokenKind::RBrace) {
                value = Some(expr);
            } else {
                return Err(self.error("expected ';'"));
            }
        }
    }

    fn starts_declaration(&self) -> bool {
        matches!(
            self.peek().kind,
            TokenKind::Let
                | TokenKind::Return
                | TokenKind::If
                | TokenKind::Fn
                | TokenKind::Struct
                | TokenKind::Typeclass
                | TokenKind::Instance
        )
    }

    fn parse_statement(&mut self) -> Result<Statement, CoreError> {
        let start = self.peek().span;
        let kind = match self.peek().kind {
            TokenKind::Let => self.parse_let()?,
            TokenKind::Return => {
                self.bump();
                let value = self.parse_expr(true)?;
                self.expect(TokenKind::Semi, "';'")?;
                StatementKind::Return(value)
            }
            TokenKind::If => StatementKind::If(self.parse_if()?),
            TokenKind::Fn => StatementKind::Function(self.parse_function(false)?),
            TokenKind::Struct => StatementKind::Struct(self.parse_struct()?),
            TokenKind::Typeclass => StatementKind::Typeclass(self.parse_typeclass()?),
            TokenKind::Instance => StatementKind::Instance(self.parse_instance()?),
            _ => {
                let expr = self.parse_expr(true)?;
                self.expect(TokenKind::Semi, "';'")?;
                StatementKind::Expr(expr)
            }
        };
        let end = self.previous().span;
        Ok(Statement {
            kind,
            span: start.to(end),
        })
    }

    fn parse_let(&mut self) -> Result<StatementKind, CoreError> {
        self.expect(TokenKind::Let, "'let'")?;
        let name = self.parse_ident()?;
        let annotation = if self.eat(TokenKind::Colon).is_some() {
            Some(self.parse_expr(true)?)
        } else {
            None
        };
        self.expect(TokenKind::Equal, "'='")?;
        let init = self.parse_expr(true)?;
        self.expect(TokenKind::Semi, "';'")?;
        Ok(StatementKind::Let(LetDecl {
            name,
            annotation,
            init,
        }))
    }

    fn parse_if(&mut self) -> Result<IfStmt, CoreError> {
        self.expect(TokenKind::If, "'if'")?;
        let condition = self.parse_expr(false)?;
        let then_block = self.parse_block(false)?;
        let else_block = if self.eat(TokenKind::Else).is_some() {
            if self.at(TokenKind::If) {
                let nested = self.parse_statement()?;
                let span = nested.span;
                Some(Block {
                    rows: vec![BlockRow::Statement(nested)],
                    value: None,
                    span,
                })
            } else {
                Some(self.parse_block(false)?)
            }
        } else {
            None
        };
        Ok(IfStmt {
            condition,
            then_block,
            else_block,
        })
    }

    fn parse_function(&mut self, allow_declaration: bool) -> Result<FunctionDef, CoreError> {
        let start = self.expect(TokenKind::Fn, "'fn'")?.span;
        let name = self.parse_ident()?;
        self.expect(TokenKind::LParen, "'('")?;
        let params = self.parse_params()?;
        self.expect(TokenKind::RParen, "')'")?;
        let return_type = if self.eat(TokenKind::Arrow).is_some() {
            Some(self.parse_expr(false)?)
        } else {
            None
        };

        let body = if allow_declaration && self.at(TokenKind::Semi) {
            self.bump();
            None
        } else {
            Some(self.parse_block(true)?)
        };

        Ok(FunctionDef {
            name,
            params,
            return_type,
            body,
            span: start.to(self.previous().span),
        })
    }

    fn parse_params(&mut self) -> Result<Vec<Param>, CoreError> {
        let mut params = Vec::new();
        if self.at(TokenKind::RParen) {
            return Ok(params);
        }
        loop {
            let name = self.parse_ident()?;
            self.expect(TokenKind::Colon, "':'")?;
            let ty = self.parse_expr(false)?;
            let span = name.span.to(ty.span);
            params.push(Param { name, ty, span });
            if self.eat(TokenKind::Comma).is_none() {
                return Ok(params);
            }
        }
    }

    fn parse_struct(&mut self) -> Result<StructDecl, CoreError> {
        self.expect(TokenKind::Struct, "'struct'")?;
        let name = self.parse_ident()?;
        self.expect(TokenKind::LBrace, "'{'")?;
        let mut fields = Vec::new();
        while !self.at(TokenKind::RBrace) {
            let field_name = self.parse_ident()?;
            self.expect(TokenKind::Colon, "':'")?;
            let ty = self.parse_expr(false)?;
            let default = if self.eat(TokenKind::Equal).is_some() {
                Some(self.parse_expr(true)?)
            } else {
                None
            };
            let span = field_name.span.to(self.previous().span);
            fields.push(FieldDecl {
                name: field_name,
                ty,
                default,
                span,
            });
            if self.eat(TokenKind::Comma).is_none() {
                break;
            }
        }
        self.expect(TokenKind::RBrace, "'}'")?;
        Ok(StructDecl { name, fields })
    }

    fn parse_typeclass(&mut self) -> Result<TypeclassDecl, CoreError> {
        self.expect(TokenKind::Typeclass, "'typeclass'")?;
        let name = self.parse_ident()?;
        self.expect(TokenKind::LParen, "'('")?;
        let params = self.parse_params()?;
        self.expect(TokenKind::RParen, "')'")?;
        let members = self.parse_member_functions(true)?;
        Ok(TypeclassDecl {
            name,
            params,
            members,
        })
    }

    fn parse_instance(&mut self) -> Result<InstanceDef, CoreError> {
        self.expect(TokenKind::Instance, "'instance'")?;
        let typeclass = self.parse_ident()?;
        self.expect(TokenKind::LParen, "'('")?;
        let arguments = self.parse_args()?;
        self.expect(TokenKind::RParen, "')'")?;
        let members = self.parse_member_functions(false)?;
        Ok(InstanceDef {
            typeclass,
            arguments,
            members,
        })
    }

    fn parse_member_functions(
        &mut self,
        allow_declaration: bool,
    ) -> Result<Vec<FunctionDef>, CoreError> {
        self.expect(TokenKind::LBrace, "'{'")?;
        let mut members = Vec::new();
        while self.eat(TokenKind::RBrace).is_none() {
            members.push(self.parse_function(allow_declaration)?);
        }
        Ok(members)
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, CoreError> {
        let mut args = Vec::new();
        if self.at(TokenKind::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr(true)?);
            if self.eat(TokenKind::Comma).is_none() {
                return Ok(args);
            }
        }
    }

    /// `allow_struct` is false in positions followed by a block (`if`
    /// conditions, return types), where `Name {` starts the block instead of a
    /// struct literal.
    fn parse_expr(&mut self, allow_struct: bool) -> Result<Expr, CoreError> {
        self.parse_binary(0, allow_struct)
    }

    fn parse_binary(&mut self, min_level: u8, allow_struct: bool) -> Result<Expr, CoreError> {
        let mut lhs = self.parse_unary(allow_struct)?;
        while let Some((op, level)) = binary_op(self.peek().kind) {
            if level < min_level {
                break;
            }
            self.bump();
            let rhs = self.parse_binary(level + 1, allow_struct)?;
            let span = lhs.span.to(rhs.span);
            lhs = Expr {
                kind: ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self, allow_struct: bool) -> Result<Expr, CoreError> {
        let op = match self.peek().kind {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Bang => UnaryOp::Not,
            _ => return self.parse_postfix(allow_struct),
        };
        let start = self.bump().span;
        let operand = self.parse_unary(allow_struct)?;
        let span = start.to(operand.span);
        Ok(Expr {
            kind: ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            span,
        })
    }

    fn parse_postfix(&mut self, allow_struct: bool) -> Result<Expr, CoreError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek().kind {
                TokenKind::LParen => {
                    self.bump();
                    let args = self.parse_args()?;
                    let close = self.expect(TokenKind::RParen, "')'")?;
                    let span = expr.span.to(close.span);
                    expr = Expr {
                        kind: ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                        },
                        span,
                    };
                }
                TokenKind::Dot => {
                    self.bump();
                    let member = self.parse_ident()?;
                    let span = expr.span.to(member.span);
                    expr = Expr {
                        kind: ExprKind::Member {
                            base: Box::new(expr),
                            member,
                        },
                        span,
                    };
                }
                TokenKind::LBrace if allow_struct && self.is_struct_literal_start() => {
                    expr = self.parse_struct_literal(expr)?;
                }
                _ => return Ok(expr),
            }
        }
    }

    /// `{ }` or `{ name :` after an expression.
    fn is_struct_literal_start(&self) -> bool {
        let next = |offset: usize| {
            self.tokens
                .get(self.position + offset)
                .map(|tok| tok.kind)
                .unwrap_or(TokenKind::Eof)
        };
        match next(1) {
            TokenKind::RBrace => true,
            TokenKind::Ident => next(2) == TokenKind::Colon,
            _ => false,
        }
    }

    fn parse_struct_literal(&mut self, ty: Expr) -> Result<Expr, CoreError> {
        self.expect(TokenKind::LBrace, "'{'")?;
        let mut fields = Vec::new();
        while !self.at(TokenKind::RBrace) {
            let name = self.parse_ident()?;
            self.expect(TokenKind::Colon, "':'")?;
            let value = self.parse_expr(true)?;
            fields.push(FieldInit { name, value });
            if self.eat(TokenKind::Comma).is_none() {
                break;
            }
        }
        let close = self.expect(TokenKind::RBrace, "'}'")?;
        let span = ty.span.to(close.span);
        Ok(Expr {
            kind: ExprKind::StructLiteral {
                ty: Box::new(ty),
                fields,
            },
            span,
        })
    }

    fn parse_primary(&mut self) -> Result<Expr, CoreError> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::IntLiteral => {
                self.bump();
                let digits: String = token
                    .text(self.source)
                    .chars()
                    .filter(|ch| *ch != '_')
                    .collect();
                let value = digits.parse::<i64>().map_err(|_| CoreError::ParseError {
                    message: format!("integer literal `{digits}` is out of range"),
                    span: token.span,
                })?;
                Ok(Expr {
                    kind: ExprKind::Integer(value),
                    span: token.span,
                })
            }
            TokenKind::BoolLiteral => {
                self.bump();
                Ok(Expr {
                    kind: ExprKind::Boolean(token.text(self.source) == "true"),
                    span: token.span,
                })
            }
            TokenKind::Ident => {
                let ident = self.parse_ident()?;
                Ok(Expr {
                    span: ident.span,
                    kind: ExprKind::Ident(ident),
                })
            }
            TokenKind::LParen => {
                self.bump();
                let inner = self.parse_expr(true)?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(inner)
            }
            _ => Err(self.error("expected expression")),
        }
    }

    fn parse_ident(&mut self) -> Result<Ident, CoreError> {
        let token = self.expect(TokenKind::Ident, "identifier")?;
        Ok(Ident {
            name: token.text(self.source).to_string(),
            span: token.span,
        })
    }

    fn peek(&self) -> &Token {
        // The token list always ends with Eof, and `bump` never moves past it.
        &self.tokens[self.position.min(self.tokens.len() - 1)]
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.position.saturating_sub(1)]
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn bump(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::Eof {
            self.position += 1;
        }
        token
    }

    fn eat(&mut self, kind: TokenKind) -> Option<Token> {
        if self.at(kind) { Some(self.bump()) } else { None }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token, CoreError> {
        self.eat(kind)
            .ok_or_else(|| self.error(&format!("expected {what}")))
    }

    fn error(&self, message: &str) -> CoreError {
        let token = self.peek();
        let found = if token.kind == TokenKind::Eof {
            "end of input".to_string()
        } else {
            format!("`{}`", token.text(self.source))
        };
        CoreError::ParseError {
            message: format!("{message}, found {found}"),
            span: token.span,
        }
    }
}

fn binary_op(kind: TokenKind) -> Option<(BinaryOp, u8)> {
    let op = match kind {
        TokenKind::EqualEqual => (BinaryOp::Eq, 0),
        TokenKind::BangEqual => (BinaryOp::Ne, 0),
        TokenKind::Less => (BinaryOp::Lt, 1),
        TokenKind::LessEqual => (BinaryOp::Le, 1),
        TokenKind::Greater => (BinaryOp::Gt, 1),
        TokenKind::GreaterEqual => (BinaryOp::Ge, 1),
        TokenKind::Plus => (BinaryOp::Add, 2),
        TokenKind::Minus => (BinaryOp::Sub, 2),
        TokenKind::Star => (BinaryOp::Mul, 3),
        _ => return None,
    };
    Some(op)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_unit(source: &str) -> Module {
        parse(FileId::UNIT, source).expect("parse")
    }

    #[test]
    fn parses_function_with_early_return() {
        let module = parse_unit("fn f() -> integer { if true { return 1; } return 2; }");
        assert_eq!(module.items.len(), 1);
        let StatementKind::Function(func) = &module.items[0].statement.kind else {
            panic!("expected function");
        };
        assert_eq!(func.name.name, "f");
        assert!(func.return_type.is_some());
        let body = func.body.as_ref().expect("body");
        assert_eq!(body.rows.len(), 2);
        assert!(body.value.is_none());
    }

    #[test]
    fn respects_operator_precedence() {
        let module = parse_unit("let x = 1 + 2 * 3 == 7;");
        let StatementKind::Let(decl) = &module.items[0].statement.kind else {
            panic!("expected let");
        };
        let ExprKind::Binary { op, lhs, .. } = &decl.init.kind else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinaryOp::Eq);
        assert!(matches!(
            lhs.kind,
            ExprKind::Binary {
                op: BinaryOp::Add,
                ..
            }
        ));
    }

    #[test]
    fn parses_trailing_value_only_in_function_bodies() {
        let module = parse_unit("fn g(x : integer) -> integer { x + 1 }");
        let StatementKind::Function(func) = &module.items[0].statement.kind else {
            panic!("expected function");
        };
        assert!(func.body.as_ref().expect("body").value.is_some());

        let err = parse(FileId::UNIT, "fn h() -> integer { if true { 1 } return 2; }").unwrap_err();
        assert!(matches!(err, CoreError::ParseError { .. }));
    }

    #[test]
    fn condition_does_not_swallow_block_as_struct_literal() {
        let module = parse_unit("fn k(b : boolean) -> integer { if b { return 1; } return 0; }");
        let StatementKind::Function(func) = &module.items[0].statement.kind else {
            panic!("expected function");
        };
        let body = func.body.as_ref().expect("body");
        let BlockRow::Statement(Statement {
            kind: StatementKind::If(stmt),
            ..
        }) = &body.rows[0]
        else {
            panic!("expected if");
        };
        assert!(matches!(stmt.condition.kind, ExprKind::Ident(_)));
    }

    #[test]
    fn parses_struct_typeclass_and_instance() {
        let module = parse_unit(
            "export struct Point { x : integer, y : integer = 0 }
             typeclass Show(T : type) { fn show(v : T) -> integer; }
             instance Show(integer) { fn show(v : integer) -> integer { return v; } }
             fn origin() -> Point { return Point { x: 0 }; }",
        );
        assert_eq!(module.items.len(), 4);
        assert!(module.items[0].exported);
        let StatementKind::Typeclass(tc) = &module.items[1].statement.kind else {
            panic!("expected typeclass");
        };
        assert!(tc.members[0].body.is_none());
        let StatementKind::Instance(inst) = &module.items[2].statement.kind else {
            panic!("expected instance");
        };
        assert_eq!(inst.typeclass.name, "Show");
        assert_eq!(inst.arguments.len(), 1);
    }

    #[test]
    fn rejects_bodiless_function_outside_typeclass() {
        let err = parse(FileId::UNIT, "fn f() -> integer;").unwrap_err();
        assert!(matches!(err, CoreError::ParseError { .. }));
    }

    #[test]
    fn surfaces_lexer_errors() {
        let err = parse(FileId::UNIT, "let x = 1 $ 2;").unwrap_err();
        assert!(matches!(err, CoreError::LexError { position: 10, .. }));
    }
}
